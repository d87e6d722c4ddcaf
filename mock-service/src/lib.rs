use axum::{
    debug_handler,
    extract::Path,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use lazy_static::lazy_static;
use metrics::counter;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/status/:code", get(status))
        .route("/returning", get(returning))
        .route(
            "/limited/:max_tps/delay/ms/:delay_ms/server/:server_id",
            get(limited),
        )
        .layer(TraceLayer::new_for_http())
}

/// Serve the mock routes on `addr` until the process exits.
pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router()).await?;
    Ok(())
}

/// Serve the mock routes on an ephemeral local port in the current runtime.
pub async fn spawn() -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router()).await {
            tracing::error!("Mock service stopped: {err}");
        }
    });
    debug!("Mock service spawned on {addr}");
    Ok(addr)
}

#[debug_handler]
pub async fn index() -> &'static str {
    measure();
    "<html><body>stampede mock service</body></html>"
}

#[debug_handler]
pub async fn delay(Path(delay_ms): Path<u64>) {
    measure();
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

#[debug_handler]
pub async fn status(Path(code): Path<u16>) -> StatusCode {
    measure();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Answers 401 and sets a `visited` cookie on a first visit, 200 once the cookie comes back.
#[debug_handler]
pub async fn returning(headers: HeaderMap) -> Response {
    measure();
    let visited = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .any(|pair| pair.trim() == "visited=1");

    if visited {
        (StatusCode::OK, "welcome back").into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::SET_COOKIE, "visited=1; Path=/")],
            "first visit",
        )
            .into_response()
    }
}

lazy_static! {
    static ref LIMITED_MAP: RwLock<HashMap<String, Arc<DefaultDirectRateLimiter>>> =
        RwLock::new(HashMap::new());
}

/// Answers 503 once `server_id` is asked for more than `max_tps` requests per second.
#[debug_handler]
pub async fn limited(
    Path((max_tps, delay_ms, server_id)): Path<(u32, u64, String)>,
) -> Result<(), StatusCode> {
    measure();
    let limiter = limiter_for(server_id, max_tps)?;

    if limiter.check().is_err() {
        debug!("Over capacity");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    Ok(())
}

fn limiter_for(
    server_id: String,
    max_tps: u32,
) -> Result<Arc<DefaultDirectRateLimiter>, StatusCode> {
    let read = LIMITED_MAP
        .read()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .get(&server_id)
        .cloned();
    if let Some(limiter) = read {
        return Ok(limiter);
    }

    let limiter = Arc::new(rate_limiter(max_tps).ok_or(StatusCode::BAD_REQUEST)?);
    Ok(LIMITED_MAP
        .write()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .entry(server_id)
        .or_insert(limiter)
        .clone())
}

/** Utils **/

pub fn rate_limiter(tps: u32) -> Option<DefaultDirectRateLimiter> {
    Some(RateLimiter::direct(Quota::per_second(NonZeroU32::new(tps)?)))
}

/** TPS Printer **/

static TPS_MEASURE: AtomicU64 = AtomicU64::new(0);

fn measure() {
    counter!("mock_service_requests").increment(1);
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
}

pub async fn tps_measure_task() {
    loop {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let requests = TPS_MEASURE.swap(0, Ordering::Relaxed);
        info!("{requests} requests/s");
    }
}
