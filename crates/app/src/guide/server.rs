//! Actix Web server exposing the guide WebSocket, status, and metrics.
//!
//! The server runs on a dedicated thread with its own Actix system so the
//! capture thread never shares a runtime with socket I/O. Each WebSocket
//! connection is a single task that multiplexes inbound commands, OCR
//! results, and the frame poll tick.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer,
    http::header,
    web::{self, Data},
};
use actix_ws::{AggregatedMessage, Closed};
use anyhow::{Context, Result, anyhow};
use ml_core::TextExtractor;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::guide::{
    context::GuideContext,
    data::Outbound,
    ocr_gate::{self, OcrJob},
    session::Session,
    telemetry,
};

const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_FRAME_SIZE: usize = 64 * 1024;
/// Open WebSocket connections are cut after this on shutdown.
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for the server thread.
pub struct GuideServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl GuideServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the server to stop and block until the thread exits.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Register the guide routes. Callers provide `Data<GuideContext>`.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(status_route))
        .route("/ws", web::get().to(ws_route))
        .route("/metrics", web::get().to(metrics_route));
}

/// Bind the listener and serve on a dedicated thread.
///
/// Returns once the socket is bound, so address errors surface at startup.
pub fn spawn_server(ctx: GuideContext) -> Result<GuideServer> {
    let config = ctx.state.config();
    let bind_addr = (config.host.clone(), config.port);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (bound_tx, bound_rx) = crossbeam_channel::bounded::<Result<SocketAddr>>(1);

    let handle = telemetry::spawn_thread("guide-http", move || {
        let result = actix_web::rt::System::new().block_on(async move {
            let data = Data::new(ctx);
            let server = match HttpServer::new(move || {
                App::new().app_data(data.clone()).configure(routes)
            })
            .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
            .bind(bind_addr.clone())
            {
                Ok(server) => {
                    let local = server.addrs().first().copied().ok_or_else(|| {
                        anyhow!("No listener bound for {}:{}", bind_addr.0, bind_addr.1)
                    });
                    let _ = bound_tx.send(local);
                    server.run()
                }
                Err(err) => {
                    let _ = bound_tx.send(Err(anyhow!(err)
                        .context(format!("Failed to bind {}:{}", bind_addr.0, bind_addr.1))));
                    return Ok(());
                }
            };

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn HTTP server thread")?;

    let local_addr = bound_rx
        .recv()
        .context("HTTP server thread exited before binding")??;
    info!("Listening on http://{local_addr}");

    Ok(GuideServer {
        local_addr,
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Process status and current mode.
async fn status_route(req: HttpRequest, ctx: Data<GuideContext>) -> HttpResponse {
    let mut response = HttpResponse::Ok();
    if let Some(origin) = allowed_origin(&req, &ctx.state.config().cors_origins) {
        response
            .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, origin))
            .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
            .insert_header((header::VARY, "Origin"));
    }
    response.json(ctx.state.status())
}

fn allowed_origin(req: &HttpRequest, allowed: &[String]) -> Option<String> {
    let origin = req.headers().get(header::ORIGIN)?.to_str().ok()?;
    allowed
        .iter()
        .any(|candidate| candidate == "*" || candidate == origin)
        .then(|| origin.to_string())
}

async fn metrics_route() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().finish(),
    }
}

async fn ws_route(
    req: HttpRequest,
    body: web::Payload,
    ctx: Data<GuideContext>,
) -> actix_web::Result<HttpResponse> {
    let (response, ws, stream) = actix_ws::handle(&req, body)?;
    let stream = stream
        .max_frame_size(MAX_FRAME_SIZE)
        .aggregate_continuations();
    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let span = info_span!("guide.session", id);
    actix_web::rt::spawn(connection_loop(ctx.get_ref().clone(), id, ws, stream).instrument(span));
    Ok(response)
}

async fn connection_loop(
    ctx: GuideContext,
    id: u64,
    mut ws: actix_ws::Session,
    mut stream: actix_ws::AggregatedMessageStream,
) {
    let mut session = Session::open(&ctx, id);
    info!("client connected");

    let (ocr_tx, mut ocr_rx) = mpsc::unbounded_channel::<Vec<Outbound>>();
    let mut tick = actix_web::rt::time::interval(FRAME_POLL_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            inbound = stream.recv() => match inbound {
                Some(Ok(AggregatedMessage::Text(text))) => {
                    let outcome = session.handle_text(&text);
                    if send_all(&mut ws, &outcome.replies).await.is_err() {
                        break None;
                    }
                    if let Some(job) = outcome.ocr {
                        spawn_ocr(job, ctx.extractor.clone(), ocr_tx.clone());
                    }
                }
                Some(Ok(AggregatedMessage::Ping(bytes))) => {
                    if ws.pong(&bytes).await.is_err() {
                        break None;
                    }
                }
                Some(Ok(AggregatedMessage::Close(reason))) => break reason,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("WebSocket protocol error: {err}");
                    break None;
                }
                None => break None,
            },
            Some(messages) = ocr_rx.recv() => {
                if send_all(&mut ws, &messages).await.is_err() {
                    break None;
                }
            }
            _ = tick.tick() => {
                if send_all(&mut ws, &session.poll_notices()).await.is_err() {
                    break None;
                }
                let mut closed = false;
                while let Some(messages) = session.poll_frame(Instant::now()) {
                    if send_all(&mut ws, &messages).await.is_err() {
                        closed = true;
                        break;
                    }
                }
                if closed {
                    break None;
                }
            }
        }
    };

    let _ = ws.close(reason).await;
    drop(session);
    info!("client disconnected");
}

async fn send_all(ws: &mut actix_ws::Session, messages: &[Outbound]) -> Result<(), Closed> {
    for message in messages {
        match serde_json::to_string(message) {
            Ok(text) => ws.text(text).await?,
            Err(err) => error!(kind = message.kind(), "failed to serialise message: {err}"),
        }
    }
    Ok(())
}

/// Run OCR on the blocking pool and post the result back to the connection.
fn spawn_ocr(
    job: OcrJob,
    extractor: Arc<dyn TextExtractor>,
    tx: mpsc::UnboundedSender<Vec<Outbound>>,
) {
    actix_web::rt::spawn(
        async move {
            let messages =
                match web::block(move || ocr_gate::run_ocr(&job, extractor.as_ref())).await {
                    Ok(messages) => messages,
                    Err(err) => {
                        error!("OCR task failed: {err}");
                        vec![Outbound::tts(ocr_gate::NO_TEXT)]
                    }
                };
            if tx.send(messages).is_err() {
                debug!("connection closed before OCR finished");
            }
        }
        .instrument(Span::current()),
    );
}
