//! The HTTP front door: one POST endpoint multiplexing the whole
//! protocol, a status page, and two redirect stubs.

use std::net::IpAddr;

use actix_web::http::header;
use actix_web::web::{Bytes, Data, Path};
use actix_web::{get, post, App, HttpRequest, HttpResponse, HttpServer, Responder};
use bancho::{packets, ClientPacketId, PacketStream};

use crate::handlers;
use crate::login;
use crate::server::Server;

/// GET "/" — a trivial page for anyone poking the endpoint with a
/// browser.
#[get("/")]
async fn index(server: Data<Server>) -> impl Responder {
    let online = server.sessions.len().await.saturating_sub(1);
    let packets = ClientPacketId::ALL;
    let packet_list = packets
        .iter()
        .map(|p| format!("{:?} ({})", p, *p as u16))
        .collect::<Vec<_>>()
        .join("<br>");
    let contents = format!(
        "<!DOCTYPE html>\
         <html><body>\
         Running cho v{}<br>\
         Players online: {}<br>\
         <br>\
         <b>packets handled ({})</b><br>\
         {}\
         </body></html>",
        env!("CARGO_PKG_VERSION"),
        online,
        packets.len(),
        packet_list,
    );
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(contents)
}

fn request_ip(req: &HttpRequest) -> Option<IpAddr> {
    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(ip) = real_ip.to_str().unwrap_or("").parse() {
            return Some(ip);
        }
    }
    req.peer_addr().map(|addr| addr.ip())
}

/// POST "/" — the client stream. No `osu-token` header means a login;
/// anything else is a batch of packets for an existing session.
#[post("/")]
async fn bancho_handler(req: HttpRequest, body: Bytes, server: Data<Server>) -> HttpResponse {
    let osu_client = req
        .headers()
        .get(header::USER_AGENT)
        .map(|ua| ua.as_bytes() == b"osu!")
        .unwrap_or(false);
    if !osu_client {
        return HttpResponse::BadRequest().finish();
    }

    let Some(ip) = request_ip(&req) else {
        return HttpResponse::BadRequest().finish();
    };

    let token = req
        .headers()
        .get("osu-token")
        .and_then(|t| t.to_str().ok());

    let Some(token) = token else {
        // The client is performing a login.
        return match login::login(&server, &body, ip).await {
            Ok(outcome) => HttpResponse::Ok()
                .insert_header(("cho-token", outcome.token().to_string()))
                .body(outcome.into_body()),
            Err(err) => {
                log::error!("login failed: {}", err);
                HttpResponse::InternalServerError().finish()
            }
        };
    };

    let Some(session) = server.sessions.get_by_token(token).await else {
        // Chances are we just restarted; have the client reconnect.
        let mut data = packets::notification("Server has restarted.");
        data.extend(packets::restart(0));
        return HttpResponse::Ok().body(data);
    };

    let restricted = session.restricted();
    for packet in PacketStream::new(&body) {
        match packet {
            Ok(packet) => {
                if restricted && !handlers::allowed_while_restricted(&packet) {
                    continue;
                }
                if let Err(err) = handlers::dispatch(&server, &session, packet).await {
                    // A failing handler never takes the session down;
                    // the queue is still flushed below.
                    log::error!("handler failed for {}: {}", session, err);
                }
            }
            Err(err) => log::warn!("dropping malformed packet from {}: {}", session, err),
        }
    }

    session.touch();
    HttpResponse::Ok().body(session.dequeue().await)
}

/// GET "/preview/{file}" — audio previews live on the mirror.
#[get("/preview/{file}")]
async fn preview(server: Data<Server>, file: Path<String>) -> HttpResponse {
    HttpResponse::MovedPermanently()
        .insert_header((
            header::LOCATION,
            format!("{}/preview/{}", server.config.mirror_url, file),
        ))
        .finish()
}

/// Everything else belongs to the official servers.
#[get("/{path:.*}")]
async fn fallthrough(path: Path<String>) -> HttpResponse {
    HttpResponse::MovedPermanently()
        .insert_header((header::LOCATION, format!("https://b.ppy.sh/{}", path)))
        .finish()
}

/// Bind and serve until shutdown.
pub async fn run(server: Server) -> std::io::Result<()> {
    let bind_address = server.config.bind_address.clone();
    log::info!("serving on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(server.clone()))
            .service(index)
            .service(bancho_handler)
            .service(preview)
            .service(fallthrough)
    })
    .bind(bind_address)?
    .run()
    .await
}
