//! End-to-end routing scenarios through the public `Router -> Dispatcher` API.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use sprig::middleware::recovery::Recovery;
use sprig::{Context, Dispatcher, Handler, Method, Middleware, RouteError, Router, StatusCode};

type Log = Arc<Mutex<Vec<String>>>;

fn get(path: &str) -> http::Request<Bytes> {
    http::Request::get(path).body(Bytes::new()).unwrap()
}

/// Responds with the matched route so tests can tell routes apart.
fn echo_route(ctx: &mut Context) {
    let route = ctx.matched_route().to_owned();
    ctx.set_response(StatusCode::OK, route);
}

fn body(d: &Dispatcher, path: &str) -> (StatusCode, String) {
    let res = d.dispatch(get(path));
    let status = res.status();
    (status, String::from_utf8(res.into_body().to_vec()).unwrap())
}

/// Records `<name>:before` and `<name>:after` around `next`.
fn tag(log: &Log, name: &'static str) -> Middleware {
    let log = Arc::clone(log);
    Middleware::new(move |next| {
        let log = Arc::clone(&log);
        Handler::new(move |ctx| {
            log.lock().unwrap().push(format!("{name}:before"));
            next.call(ctx);
            log.lock().unwrap().push(format!("{name}:after"));
        })
    })
}

#[test]
fn static_beats_dynamic_at_same_depth() {
    let d = Router::new()
        .get("/a/:id", echo_route)
        .get("/a/b", echo_route)
        .resolve();

    assert_eq!(body(&d, "/a/b"), (StatusCode::OK, "/a/b".to_owned()));
    assert_eq!(body(&d, "/a/c"), (StatusCode::OK, "/a/:id".to_owned()));
}

#[test]
fn param_and_wildcard_conflict_both_ways() {
    for (first, second) in [("/a/:id", "/a/*"), ("/a/*", "/a/:id")] {
        let mut router = Router::new();
        router.add_route(Method::GET, first, Handler::new(echo_route), Vec::new()).unwrap();
        let err = router
            .add_route(Method::GET, second, Handler::new(echo_route), Vec::new())
            .unwrap_err();
        assert!(matches!(err, RouteError::Conflict { .. }), "{first} then {second}: {err}");
    }
}

#[test]
fn duplicate_route_is_rejected() {
    let mut router = Router::new();
    router.add_route(Method::GET, "/a/b", Handler::new(echo_route), Vec::new()).unwrap();
    let err = router
        .add_route(Method::GET, "/a/b", Handler::new(echo_route), Vec::new())
        .unwrap_err();
    assert!(matches!(err, RouteError::Duplicate { .. }));
}

#[test]
fn regex_segment_filters_values() {
    let d = Router::new()
        .get("/sku/:id(^[0-9]+$)", |ctx| {
            let id = ctx.path_value("id").unwrap().to_owned();
            ctx.set_response(StatusCode::OK, id);
        })
        .resolve();

    assert_eq!(body(&d, "/sku/42"), (StatusCode::OK, "42".to_owned()));
    assert_eq!(body(&d, "/sku/abc").0, StatusCode::NOT_FOUND);
}

#[test]
fn trailing_wildcard_swallows_the_rest() {
    let d = Router::new().get("/order/*", echo_route).resolve();

    assert_eq!(body(&d, "/order/detail").0, StatusCode::OK);
    assert_eq!(body(&d, "/order/detail/2024").0, StatusCode::OK);
    assert_eq!(body(&d, "/order").0, StatusCode::NOT_FOUND);
}

#[test]
fn middle_wildcard_and_static_sibling() {
    let d = Router::new()
        .get("/a/*/c", echo_route)
        .get("/a/b/c", echo_route)
        .resolve();

    assert_eq!(body(&d, "/a/x/c").1, "/a/*/c");
    assert_eq!(body(&d, "/a/b/c").1, "/a/b/c");
}

#[test]
fn route_string_round_trips() {
    let patterns = ["/", "/users/:id", "/sku/:id(^[0-9]+$)", "/files/*", "/a/*/c"];
    let router = patterns.iter().fold(Router::new(), |r, p| r.get(p, echo_route));
    let d = router.resolve();

    for (pattern, path) in patterns.iter().zip(["/", "/users/7", "/sku/9", "/files/x/y", "/a/q/c"]) {
        let m = d.find_route(&Method::GET, path).unwrap();
        assert_eq!(m.route(), *pattern);
        assert!(m.has_handler());
    }
}

#[test]
fn unregistered_method_is_404() {
    let d = Router::new().get("/a", echo_route).resolve();
    let res = d.dispatch(http::Request::post("/a").body(Bytes::new()).unwrap());
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(d.find_route(&Method::POST, "/a").is_none());
}

#[test]
fn global_middleware_wraps_route_middleware() {
    let log: Log = Arc::default();
    let handler_log = Arc::clone(&log);
    let d = Router::new()
        .use_middleware([tag(&log, "g1"), tag(&log, "g2")])
        .route(
            Method::GET,
            "/x",
            move |ctx: &mut Context| {
                handler_log.lock().unwrap().push("handler".to_owned());
                ctx.set_status(StatusCode::OK);
            },
            [tag(&log, "r1"), tag(&log, "r2")],
        )
        .resolve();

    d.dispatch(get("/x"));
    assert_eq!(
        *log.lock().unwrap(),
        [
            "g1:before", "g2:before", "r1:before", "r2:before", "handler",
            "r2:after", "r1:after", "g2:after", "g1:after",
        ]
    );
}

#[test]
fn route_middleware_attached_separately_runs_before_the_routes_own() {
    let log: Log = Arc::default();
    let d = Router::new()
        .route(Method::GET, "/a/b", echo_route, [tag(&log, "own")])
        .use_route_middleware(Method::GET, "/", [tag(&log, "root")])
        .use_route_middleware(Method::GET, "/a", [tag(&log, "a")])
        .use_route_middleware(Method::GET, "/a/*", [tag(&log, "a-any")])
        .resolve();

    assert_eq!(body(&d, "/a/b").1, "/a/b");
    assert_eq!(
        *log.lock().unwrap(),
        [
            "root:before", "a:before", "a-any:before", "own:before",
            "own:after", "a-any:after", "a:after", "root:after",
        ]
    );
}

#[test]
fn middleware_only_pattern_does_not_block_a_later_handler() {
    let log: Log = Arc::default();
    let d = Router::new()
        .use_route_middleware(Method::GET, "/late", [tag(&log, "early")])
        .route(Method::GET, "/late", echo_route, [tag(&log, "own")])
        .resolve();

    assert_eq!(body(&d, "/late"), (StatusCode::OK, "/late".to_owned()));
    assert_eq!(
        *log.lock().unwrap(),
        ["early:before", "own:before", "own:after", "early:after"]
    );
}

#[test]
fn short_circuit_is_still_flushed_once() {
    let deny = Middleware::new(|_next| {
        Handler::new(|ctx| ctx.set_response(StatusCode::FORBIDDEN, "denied"))
    });
    let upgrade = Middleware::new(|next| {
        Handler::new(move |ctx| {
            next.call(ctx);
            // Runs after the inner short-circuit; the flush sees this value.
            if ctx.status() == Some(StatusCode::FORBIDDEN) {
                ctx.set_response(StatusCode::UNAUTHORIZED, "log in first");
            }
        })
    });
    let d = Router::new()
        .use_middleware([upgrade])
        .route(Method::GET, "/secret", |_ctx: &mut Context| panic!("unreachable"), [deny])
        .resolve();

    let res = d.dispatch(get("/secret"));
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.body().as_ref(), b"log in first");
}

#[test]
fn recovered_panic_is_flushed_as_500() {
    let d = Router::new()
        .use_middleware([Recovery::new().build()])
        .get("/boom", |_ctx| panic!("boom"))
        .resolve();

    let (status, text) = body(&d, "/boom");
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(text, "internal server error");
}

#[test]
fn query_first_occurrence_wins() {
    let d = Router::new()
        .get("/search", |ctx| {
            let q = ctx.query_value("q").unwrap().to_owned();
            let missing = ctx.query_value("page").is_err();
            ctx.set_response(StatusCode::OK, format!("{q}|{missing}"));
        })
        .resolve();

    assert_eq!(body(&d, "/search?q=rust&q=go").1, "rust|true");
}

#[test]
fn path_segments_are_percent_decoded() {
    let d = Router::new()
        .get("/users/:name", |ctx| {
            let name = ctx.path_value("name").unwrap().to_owned();
            ctx.set_response(StatusCode::OK, name);
        })
        .get("/caf\u{e9}", echo_route)
        .resolve();

    assert_eq!(body(&d, "/users/john%20doe"), (StatusCode::OK, "john doe".to_owned()));
    assert_eq!(body(&d, "/caf%C3%A9"), (StatusCode::OK, "/caf\u{e9}".to_owned()));
}
