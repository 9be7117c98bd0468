use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use log::info;
use simplepay_sdk::api::callback_controller;
use simplepay_sdk::{CallbackVerifier, MerchantConfig};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    // Loads .env as well
    let config = MerchantConfig::from_env();

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .expect("PORT must be a number");

    info!("Starting callback server at {}:{}", host, port);
    info!("Merchant configuration: {:?}", config);

    let verifier = web::Data::new(CallbackVerifier::new(config));

    HttpServer::new(move || {
        App::new()
            .app_data(verifier.clone())
            .wrap(middleware::Logger::default())
            .configure(callback_controller::configure)
            .route(
                "/health",
                web::get().to(|| async { HttpResponse::Ok().body("Service is running") }),
            )
    })
    .bind((host, port))?
    .run()
    .await
}
