use skydash::DataAccessError;
use skydash::endpoints::{PageContext, candidate_bases, resolve};

#[test]
fn secure_page_never_resolves_plaintext_endpoints() {
    let page = PageContext::new(Some("https://dash.example.org"));
    let candidates = [
        Some("http://localhost:8000"),
        Some("https://api.example.org/"),
        Some("HTTP://10.0.0.7:8000"),
        Some("https://api.example.org"),
        Some("https://backup.example.org"),
    ];

    let set = resolve(candidates, &page).unwrap();
    assert!(set.iter().all(|e| !e.is_plaintext()));
    let bases: Vec<&str> = set.iter().map(|e| e.as_str()).collect();
    assert_eq!(bases, vec!["https://api.example.org", "https://backup.example.org"]);
}

#[test]
fn configured_list_plus_page_fallback() {
    let page = PageContext::new(Some("https://dash.example.org"));
    let candidates = candidate_bases(
        Some("http://localhost:8000"),
        Some("http://10.0.0.7:8000"),
        &[],
        &page,
    );
    let set = resolve(candidates, &page).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.primary().as_str(), "https://dash.example.org/api");
}

#[test]
fn empty_candidate_list_is_fatal() {
    let candidates: Vec<Option<String>> = vec![None, Some("  ".into()), Some("/".into())];
    let err = resolve(candidates, &PageContext::detached()).unwrap_err();
    assert!(matches!(err, DataAccessError::Configuration(_)));
}
