use crate::emissions::EmissionInput;
use crate::errors::CreditEngineError;
use crate::metrics;
use crate::models::{AuthContext, CreateListingRequest, IssueCreditsRequest, PurchaseRequest};
use crate::services::CreditService;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "credit-engine",
        "version": "1.0.0"
    }))
}

/// Issue credits against an owned project
pub async fn issue_credits(
    service: web::Data<Arc<CreditService>>,
    req: HttpRequest,
    request: web::Json<IssueCreditsRequest>,
) -> Result<HttpResponse, CreditEngineError> {
    let ctx = AuthContext::from_request(&req)?;
    let lot = service.issue_credits(ctx, request.into_inner()).await?;
    Ok(HttpResponse::Ok().json(lot))
}

/// List credits for sale
pub async fn create_listing(
    service: web::Data<Arc<CreditService>>,
    req: HttpRequest,
    request: web::Json<CreateListingRequest>,
) -> Result<HttpResponse, CreditEngineError> {
    let ctx = AuthContext::from_request(&req)?;
    let response = service.create_listing(ctx, request.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Cancel an active listing
pub async fn cancel_listing(
    service: web::Data<Arc<CreditService>>,
    req: HttpRequest,
    listing_id: web::Path<Uuid>,
) -> Result<HttpResponse, CreditEngineError> {
    let ctx = AuthContext::from_request(&req)?;
    let listing = service.cancel_listing(ctx, *listing_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "listing_id": listing.id,
        "status": listing.status
    })))
}

/// Browse active listings (excludes the caller's own)
pub async fn browse_listings(
    service: web::Data<Arc<CreditService>>,
    req: HttpRequest,
) -> Result<HttpResponse, CreditEngineError> {
    let ctx = AuthContext::from_request(&req)?;
    let listings = service.browse_listings(ctx).await?;
    Ok(HttpResponse::Ok().json(json!({
        "listings": listings,
        "count": listings.len()
    })))
}

/// Purchase credits from a listing
pub async fn purchase_credits(
    service: web::Data<Arc<CreditService>>,
    req: HttpRequest,
    listing_id: web::Path<Uuid>,
    request: web::Json<PurchaseRequest>,
) -> Result<HttpResponse, CreditEngineError> {
    let ctx = AuthContext::from_request(&req)?;
    let response = service
        .purchase_credits(ctx, *listing_id, request.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// The caller's own listings, all statuses
pub async fn my_listings(
    service: web::Data<Arc<CreditService>>,
    req: HttpRequest,
) -> Result<HttpResponse, CreditEngineError> {
    let ctx = AuthContext::from_request(&req)?;
    let listings = service.my_listings(ctx).await?;
    Ok(HttpResponse::Ok().json(json!({
        "listings": listings,
        "count": listings.len()
    })))
}

/// Balance summary for the caller
pub async fn get_balance(
    service: web::Data<Arc<CreditService>>,
    req: HttpRequest,
) -> Result<HttpResponse, CreditEngineError> {
    let ctx = AuthContext::from_request(&req)?;
    let balance = service.get_balance(ctx.user_id).await?;
    Ok(HttpResponse::Ok().json(balance))
}

/// The caller's credit lots
pub async fn get_credit_lots(
    service: web::Data<Arc<CreditService>>,
    req: HttpRequest,
) -> Result<HttpResponse, CreditEngineError> {
    let ctx = AuthContext::from_request(&req)?;
    let lots = service.get_credit_lots(ctx.user_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "user_id": ctx.user_id.to_string(),
        "credits": lots
    })))
}

/// The caller's ledger history
pub async fn get_transactions(
    service: web::Data<Arc<CreditService>>,
    req: HttpRequest,
) -> Result<HttpResponse, CreditEngineError> {
    let ctx = AuthContext::from_request(&req)?;
    let transactions = service.get_transactions(ctx.user_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "user_id": ctx.user_id.to_string(),
        "transactions": transactions
    })))
}

/// Deterministic emissions calculation
pub async fn calculate_emissions(
    service: web::Data<Arc<CreditService>>,
    input: web::Json<EmissionInput>,
) -> Result<HttpResponse, CreditEngineError> {
    let result = service.calculate_emissions(input.into_inner()).await?;
    Ok(HttpResponse::Ok().json(result))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    match metrics::metrics_handler() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .route("/credits/issue", web::post().to(issue_credits))
            .route("/credits", web::get().to(get_credit_lots))
            .route("/balance", web::get().to(get_balance))
            .route("/transactions", web::get().to(get_transactions))
            .route("/emissions/calculate", web::post().to(calculate_emissions))
            .route("/marketplace/listings", web::get().to(browse_listings))
            .route("/marketplace/my-listings", web::get().to(my_listings))
            .route("/marketplace/list", web::post().to(create_listing))
            .route(
                "/marketplace/listings/{listing_id}/cancel",
                web::post().to(cancel_listing),
            )
            .route(
                "/marketplace/buy/{listing_id}",
                web::post().to(purchase_credits),
            ),
    )
    .route("/metrics", web::get().to(metrics_endpoint))
    .route("/health", web::get().to(health_check));
}
