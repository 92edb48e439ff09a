use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;

use api::handlers::NodeIdentity;
use blockchain::{Blockchain, ChainConfig};

/// Reads the listen port and chain configuration from the environment:
/// - `POWCHAIN_PORT` listen port (default 8080)
/// - `POWCHAIN_DIFFICULTY` leading zero characters required of a block digest
fn config_from_env() -> (u16, ChainConfig) {
    let port = std::env::var("POWCHAIN_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);

    let mut config = ChainConfig::default();
    if let Some(difficulty) = std::env::var("POWCHAIN_DIFFICULTY")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        config.difficulty = difficulty;
    }

    (port, config)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::mine_block,
        api::handlers::validate_chain,
        api::handlers::register_peers,
        api::handlers::resolve_conflicts
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            blockchain::ChainSnapshot,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineRequest,
            api::handlers::MineResponse,
            api::handlers::RegisterPeersRequest,
            api::handlers::RegisterPeersResponse,
            api::handlers::ResolveResponse
        )
    ),
    tags(
        (name = "blockchain", description = "Proof-of-work ledger endpoints")
    ),
    info(
        title = "Powchain API",
        version = "1.0.0",
        description = "A minimal proof-of-work blockchain node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let (port, config) = config_from_env();

    // The node's identity doubles as its default miner address.
    let node_id = uuid::Uuid::new_v4().simple().to_string();
    info!("node identity: {}", node_id);
    info!("mining difficulty: {}", config.difficulty);

    let blockchain = web::Data::new(Blockchain::with_config(config));
    let identity = web::Data::new(NodeIdentity(node_id));

    info!("Starting HTTP server at http://127.0.0.1:{}", port);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            .app_data(identity.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(("127.0.0.1", port))?
    .run()
    .await?;

    Ok(())
}
