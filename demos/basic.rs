//! A small blog API: grouped routes, optional segments, a container-backed
//! handler argument, and middleware both global and per route.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/posts
//!   curl -i http://localhost:3000/posts/1
//!   curl -i http://localhost:3000/archive/2024/05
//!   curl -i -X DELETE http://localhost:3000/posts/7 -H 'authorization: letmein'
//!   curl -i -X PUT http://localhost:3000/posts/7        # 405, allow: GET, DELETE

use std::time::Instant;

use http::{Method, StatusCode};
use kite::middleware::{self, Next};
use kite::{
    App, AppConfig, Arguments, Container, Json, Parameter, Request, Response, Route,
    RouteCollector, Server, handler,
};

struct Posts {
    titles: Vec<&'static str>,
}

#[tokio::main]
async fn main() -> Result<(), kite::Error> {
    tracing_subscriber::fmt::init();

    let mut services = Container::new();
    services
        .instance(Posts { titles: vec!["hello", "routing", "middleware"] })
        .middleware("auth", middleware::from_fn(require_token));

    let routes = RouteCollector::new()
        .group("/posts", |posts| {
            posts
                .add(Route::new(Method::GET, "", handler::with_params([posts_param()], list)).name("posts"))?
                .add(Route::new(Method::GET, r"/{id:\d+}", handler::with_params([posts_param(), Parameter::new("id")], show)).name("post"))?
                .add(Route::new(Method::DELETE, r"/{id:\d+}", remove).layer_lazy("auth"))
        })?
        .add(
            Route::new(Method::GET, r"/archive[/{year:\d{4}}[/{month:\d{2}}]]", archive)
                .name("archive"),
        )?
        .build()?;

    let config = AppConfig::default();
    let app = App::new(routes, services)
        .with_config(config.clone())
        .middleware(middleware::from_fn(timing));

    println!("archive link: {}", app.url("archive", &[("year", "2024")], &Method::GET));

    Server::from_config(&config)?.serve(app).await
}

fn posts_param() -> Parameter {
    Parameter::of::<Posts>("posts")
}

async fn list(_req: Request, args: Arguments) -> Json<Vec<&'static str>> {
    let titles = args.get::<Posts>("posts").map(|p| p.titles.clone()).unwrap_or_default();
    Json(titles)
}

async fn show(_req: Request, args: Arguments) -> Response {
    let Some(posts) = args.get::<Posts>("posts") else {
        return Response::status(StatusCode::INTERNAL_SERVER_ERROR);
    };
    let title = args.str("id")
        .and_then(|id| id.parse::<usize>().ok())
        .and_then(|i| posts.titles.get(i).copied());
    match title {
        Some(t) => Response::text(t),
        None => Response::status(StatusCode::NOT_FOUND),
    }
}

async fn remove(_req: Request) -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn archive(req: Request) -> String {
    let year = req.param("year").unwrap_or("all years");
    let month = req.param("month").unwrap_or("every month");
    format!("archive for {month} of {year}")
}

async fn require_token(req: Request, next: Next) -> Result<Response, kite::Error> {
    if req.header("authorization") != Some("letmein") {
        return Ok(Response::status(StatusCode::UNAUTHORIZED));
    }
    next.run(req).await
}

async fn timing(req: Request, next: Next) -> Result<Response, kite::Error> {
    let started = Instant::now();
    let path = req.path().to_owned();
    let mut res = next.run(req).await?;
    res.set_header("x-elapsed-us", &started.elapsed().as_micros().to_string());
    tracing::info!(path = %path, status = %res.status_code(), "served");
    Ok(res)
}
