use portico::core::{Tree, TreeError};

fn api_tree() -> Tree<&'static str> {
    let mut tree = Tree::new();
    for route in [
        "/",
        "/health",
        "/v1/users",
        "/v1/users/:id",
        "/v1/users/:id/posts/",
        "/v1/users/:id/posts/:post",
        "/static/*filepath",
        "/docs/",
    ] {
        tree.add_route(route, route).unwrap();
    }
    tree
}

#[test]
fn test_lookup_selects_single_route() {
    let tree = api_tree();
    assert_eq!(tree.len(), 8);
    assert_eq!(tree.max_params(), 2);

    let found = tree.get_value("/v1/users/7/posts/99").unwrap();
    assert_eq!(found.value, Some(&"/v1/users/:id/posts/:post"));
    assert_eq!(found.params.get("id"), Some("7"));
    assert_eq!(found.params.get("post"), Some("99"));

    let found = tree.get_value("/static/css/site.css").unwrap();
    assert_eq!(found.value, Some(&"/static/*filepath"));
    assert_eq!(found.params.get("filepath"), Some("/css/site.css"));

    let found = tree.get_value("/v1/users").unwrap();
    assert_eq!(found.value, Some(&"/v1/users"));
    assert!(found.params.is_empty());
}

#[test]
fn test_misses_recommend_trailing_slash() {
    let tree = api_tree();

    let miss = tree.get_value("/docs").unwrap();
    assert!(miss.value.is_none());
    assert!(miss.tsr);
    assert!(miss.params.is_empty());

    let miss = tree.get_value("/health/").unwrap();
    assert!(miss.value.is_none());
    assert!(miss.tsr);

    let miss = tree.get_value("/v1/users/7/posts").unwrap();
    assert!(miss.tsr);

    let miss = tree.get_value("/v1/groups").unwrap();
    assert!(miss.value.is_none());
    assert!(!miss.tsr);
}

#[test]
fn test_case_insensitive_correction() {
    let tree = api_tree();

    assert_eq!(
        tree.find_case_insensitive_path("/V1/USERS/7", true).unwrap(),
        Some("/v1/users/7".to_string())
    );
    assert_eq!(
        tree.find_case_insensitive_path("/HEALTH/", true).unwrap(),
        Some("/health".to_string())
    );
    assert_eq!(tree.find_case_insensitive_path("/HEALTH/", false).unwrap(), None);
    assert_eq!(tree.find_case_insensitive_path("/nope", true).unwrap(), None);
}

#[test]
fn test_conflicting_registrations_leave_tree_intact() {
    let mut tree = api_tree();

    assert!(matches!(
        tree.add_route("/v1/users/:name", "dup"),
        Err(TreeError::WildcardConflict { .. } | TreeError::ConflictingRoute { .. })
    ));
    assert!(matches!(
        tree.add_route("/v1/users/me", "static"),
        Err(TreeError::ConflictingRoute { .. })
    ));
    assert!(matches!(
        tree.add_route("/health", "again"),
        Err(TreeError::DuplicateRoute { .. })
    ));
    assert!(matches!(
        tree.add_route("no-slash", "x"),
        Err(TreeError::MissingLeadingSlash { .. })
    ));
    assert!(matches!(
        tree.add_route("/files/*path/more", "x"),
        Err(TreeError::CatchAllNotLast { .. })
    ));

    assert_eq!(tree.len(), 8);
    let found = tree.get_value("/v1/users/42").unwrap();
    assert_eq!(found.value, Some(&"/v1/users/:id"));
}
