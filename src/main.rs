use cho::backend::Backend;
use cho::config::Config;
use cho::housekeeping;
use cho::routes;
use cho::server::Server;

/// The server's entry point.
///
/// The external collaborators (user store, beatmap repository, mail,
/// geolocation, commands) are deployment concerns; a standalone binary
/// runs on the in-memory backend, which is offline mode.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init(); // use log::* to write to stdout/err

    let config = Config::load();

    let (backend, _memory) = Backend::in_memory();
    log::warn!("no external services wired up; running in offline mode");

    let server = Server::init(config, backend)
        .await
        .expect("failed to initialize server state");

    let _housekeeper = housekeeping::spawn(server.clone());

    routes::run(server).await
}
