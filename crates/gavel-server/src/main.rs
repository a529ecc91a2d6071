use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use gavel_api::auth::{self, AppState, AppStateInner};
use gavel_api::middleware::require_auth;
use gavel_api::{bids, chats, notifications, posts, sale_chats};
use gavel_auction::AuctionCore;
use gavel_gateway::connection;
use gavel_gateway::dispatcher::Dispatcher;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gavel=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("GAVEL_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("GAVEL_DB_PATH").unwrap_or_else(|_| "gavel.db".into());
    let host = std::env::var("GAVEL_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("GAVEL_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let sweep_interval: u64 = std::env::var("GAVEL_SWEEP_INTERVAL_SECS")
        .unwrap_or_else(|_| "60".into())
        .parse()?;

    // Init database
    let db = Arc::new(gavel_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let core = Arc::new(AuctionCore::new(Arc::clone(&db)));

    // Background loops: lifecycle events -> rooms, lifecycle events ->
    // notifications, and the expiration sweeper.
    tokio::spawn(gavel_gateway::forwarder::run(
        dispatcher.clone(),
        core.subscribe(),
    ));
    tokio::spawn(gavel_auction::notify::run(
        Arc::clone(&db),
        core.subscribe(),
    ));
    tokio::spawn(gavel_auction::sweeper::run(
        Arc::clone(&core),
        Duration::from_secs(sweep_interval),
    ));

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        core,
        dispatcher: dispatcher.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState {
        app: app_state.clone(),
        dispatcher,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/posts", post(posts::create_post))
        .route("/posts", get(posts::list_posts))
        .route("/posts/live", get(posts::live_posts))
        .route("/posts/{post_id}", get(posts::get_post))
        .route("/posts/{post_id}", patch(posts::update_post))
        .route("/posts/{post_id}", delete(posts::delete_post))
        .route("/posts/cancel/post/{post_id}", patch(posts::cancel_post))
        .route(
            "/posts/reactivate/post/{post_id}",
            patch(posts::reactivate_post),
        )
        .route("/posts/buy-now/{post_id}", post(posts::buy_now))
        .route("/posts/end-auction/{post_id}", post(posts::end_auction))
        .route("/bids/{post_id}", post(bids::place_bid))
        .route("/bids/post/{post_id}", get(bids::get_post_bids))
        .route("/bids/user", get(bids::get_user_bids))
        .route("/bids/winning/{post_id}", get(bids::get_winning_bid))
        .route("/bids/bidders/{post_id}", get(bids::get_bidders))
        .route("/bids/sell/{post_id}", post(bids::sell_to_bidder))
        .route("/bids/sell-highest/{post_id}", post(bids::sell_to_highest))
        .route("/chats/{post_id}/messages", get(chats::get_chat_messages))
        .route("/sale-chats", get(sale_chats::list_sale_chats))
        .route("/sale-chats/{chat_id}", get(sale_chats::get_sale_chat))
        .route(
            "/sale-chats/post/{post_id}",
            get(sale_chats::get_sale_chat_by_post),
        )
        .route(
            "/sale-chats/{chat_id}/messages",
            post(sale_chats::send_sale_message),
        )
        .route("/sale-chats/{chat_id}/read", patch(sale_chats::mark_read))
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/{notification_id}/read",
            patch(notifications::mark_notification_read),
        )
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Gavel server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher,
            Arc::clone(&state.app.db),
            state.jwt_secret,
        )
    })
}
