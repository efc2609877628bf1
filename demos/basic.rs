//! Minimal sprig example: parameters, regex segments, wildcards, route
//! middleware, a rendered login page backed by cookie sessions, and
//! Prometheus metrics.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl http://localhost:3000/sku/123
//!   curl http://localhost:3000/sku/abc           # 404, regex rejects it
//!   curl http://localhost:3000/files/css/site.css
//!   curl http://localhost:3000/login
//!   curl -c jar -X POST http://localhost:3000/login -d 'user=alice&password=secret'
//!   curl -b jar http://localhost:3000/me
//!   curl http://localhost:3000/metrics
//!   curl http://localhost:3000/admin/stats       # 401 without the token
//!   curl http://localhost:3000/admin/stats -H 'authorization: Bearer let-me-in'

use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use sprig::middleware::{metrics::Metrics, recovery::Recovery, trace::Trace};
use sprig::session::{CookiePropagator, Manager, MemoryStore};
use sprig::{Context, Handler, Method, Middleware, MiniJinjaRenderer, Router, SameSite, Server, StatusCode};

const LOGIN_PAGE: &str = r#"<!doctype html>
<title>{{ title }}</title>
{% if error %}<p class="error">{{ error }}</p>{% endif %}
<form method="post" action="/login">
  <input name="user" placeholder="user">
  <input name="password" type="password">
  <button>log in</button>
</form>
"#;

/// Set by the admin guard, read by admin handlers.
#[derive(Clone)]
struct Admin(String);

#[derive(Serialize)]
struct User {
    id: u64,
    name: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut templates = MiniJinjaRenderer::new();
    templates
        .add_template("login.html", LOGIN_PAGE)
        .expect("login template");

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .expect("metrics recorder");
    let sessions = Manager::new(
        MemoryStore::new(Duration::from_secs(30 * 60)),
        CookiePropagator::new("sessid").cookie_option(|c| c.set_same_site(SameSite::Lax)),
    );

    let app = Router::new()
        .renderer(templates)
        .use_middleware([
            Recovery::new().build(),
            Trace::new().build(),
            Metrics::new().namespace("demo").build(),
            sessions.middleware(),
        ])
        .get("/metrics", move |ctx| ctx.set_body(prometheus.render()))
        .get("/users/:id", get_user)
        .get("/sku/:id(^[0-9]+$)", |ctx| {
            let body = format!("sku {}", ctx.path_value("id").unwrap_or_default());
            ctx.set_body(body);
        })
        .get("/files/*", |ctx| {
            let body = format!("static file {}", ctx.path());
            ctx.set_body(body);
        })
        .get("/login", login_page)
        .post("/login", login)
        .get("/me", me)
        .post("/logout", logout)
        .get("/admin/stats", admin_stats)
        .use_route_middleware(Method::GET, "/admin/*", [admin_guard()]);

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

fn get_user(ctx: &mut Context) {
    let id = match ctx.path_value_as::<u64>("id") {
        Ok(id) => id,
        Err(e) => return ctx.set_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let user = User { id, name: format!("user-{id}") };
    if let Err(e) = ctx.write_json(StatusCode::OK, &user) {
        ctx.set_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
}

fn login_page(ctx: &mut Context) {
    // render sets 500 itself on failure; Recovery and Trace still see it.
    let _ = ctx.render("login.html", &serde_json::json!({ "title": "Log in" }));
}

fn login(ctx: &mut Context) {
    let ok = matches!(
        (ctx.form_value("user"), ctx.form_value("password")),
        (Ok(user), Ok("secret")) if !user.is_empty()
    );
    if !ok {
        let page = serde_json::json!({ "title": "Log in", "error": "wrong user or password" });
        if ctx.render("login.html", &page).is_ok() {
            ctx.set_status(StatusCode::UNAUTHORIZED);
        }
        return;
    }

    let Some(sessions) = Manager::from_context(ctx) else {
        return ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    };
    let user = ctx.form_value("user").unwrap_or_default().to_owned();
    let id = uuid::Uuid::new_v4().to_string();
    let started = sessions
        .init_session(ctx, &id)
        .and_then(|s| s.set("user", &user));
    if started.is_err() || ctx.redirect("/me").is_err() {
        ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
}

fn me(ctx: &mut Context) {
    let Some(sessions) = Manager::from_context(ctx) else {
        return ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    };
    match sessions.get_session(ctx).and_then(|s| s.get("user")) {
        Ok(user) => {
            let _ = sessions.refresh_session(ctx);
            ctx.set_body(format!("logged in as {user}"));
        }
        Err(_) => ctx.set_response(StatusCode::UNAUTHORIZED, "log in first"),
    }
}

fn logout(ctx: &mut Context) {
    if let Some(sessions) = Manager::from_context(ctx) {
        let _ = sessions.remove_session(ctx);
    }
    ctx.set_status(StatusCode::NO_CONTENT);
}

fn admin_stats(ctx: &mut Context) {
    let who = ctx.user_value::<Admin>().map_or("nobody", |a| a.0.as_str()).to_owned();
    ctx.set_body(format!("hello {who}, all systems nominal"));
}

/// Rejects requests without the bearer token; otherwise records who called.
fn admin_guard() -> Middleware {
    Middleware::new(|next| {
        Handler::new(move |ctx| {
            if ctx.header("authorization") != Some("Bearer let-me-in") {
                ctx.set_response(StatusCode::UNAUTHORIZED, "unauthorized");
                return;
            }
            ctx.insert_user_value(Admin("operator".to_owned()));
            next.call(ctx);
        })
    })
}
