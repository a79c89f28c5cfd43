//! Router construction for the governance server.

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{delete, get, post, put},
    Extension, Router,
};
use artifact_gov_core::service::GovernanceService;

use crate::handlers;
use crate::middleware::jwt::{jwt_auth, JwtConfig};

/// Build the full axum router with all routes and middleware.
pub fn build_router(service: Arc<dyn GovernanceService>, jwt_config: JwtConfig) -> Router {
    let org = Router::new()
        .route("/", get(handlers::orgs::get_organization))
        .route("/me", get(handlers::orgs::my_role))
        .route("/bootstrap_admin", post(handlers::orgs::bootstrap_admin))
        .route("/members", get(handlers::orgs::list_members))
        .route(
            "/members/:user_id",
            put(handlers::orgs::set_member_role).delete(handlers::orgs::remove_member),
        )
        // Versions
        .route(
            "/versions",
            get(handlers::versions::list).post(handlers::versions::create_draft),
        )
        .route("/versions/clone", post(handlers::versions::clone))
        .route("/versions/current", get(handlers::versions::current))
        .route("/versions/compare", get(handlers::versions::compare))
        .route(
            "/versions/:version_id",
            get(handlers::versions::get).patch(handlers::versions::update_draft),
        )
        .route(
            "/versions/:version_id/transition",
            post(handlers::versions::transition),
        )
        // Change sets
        .route(
            "/change_sets",
            get(handlers::change_sets::list).post(handlers::change_sets::create),
        )
        .route("/change_sets/:cs_id", get(handlers::change_sets::get))
        .route("/change_sets/:cs_id/items", post(handlers::change_sets::add_item))
        .route(
            "/change_sets/:cs_id/items/:item_id",
            delete(handlers::change_sets::remove_item),
        )
        .route("/change_sets/:cs_id/submit", post(handlers::change_sets::submit))
        .route(
            "/change_sets/:cs_id/return_to_draft",
            post(handlers::change_sets::return_to_draft),
        )
        .route(
            "/change_sets/:cs_id/tasks",
            get(handlers::change_sets::list_tasks).post(handlers::change_sets::add_task),
        )
        .route(
            "/tasks/:task_id/resolve",
            post(handlers::change_sets::resolve_task),
        )
        // Review and publish
        .route("/change_sets/:cs_id/approve", post(handlers::review::approve))
        .route("/change_sets/:cs_id/reject", post(handlers::review::reject))
        .route("/change_sets/:cs_id/preflight", get(handlers::review::preflight))
        .route("/change_sets/:cs_id/publish", post(handlers::review::publish))
        // Live records
        .route(
            "/artifacts/:entity_type/:entity_id",
            delete(handlers::records::delete_cascade),
        )
        .route("/records", post(handlers::records::put_dependent))
        .route("/integrity/orphans", get(handlers::records::orphans))
        .route(
            "/integrity/coverages/:coverage_id",
            get(handlers::records::coverage_integrity),
        )
        .route("/integrity/check", get(handlers::records::comprehensive))
        // Audit
        .route("/audit", get(handlers::audit::list));

    // Routes that require JWT authentication
    let protected = Router::new()
        .route("/orgs", post(handlers::orgs::create_organization))
        .nest("/orgs/:org_id", org)
        .layer(axum_mw::from_fn(jwt_auth))
        .layer(Extension(jwt_config));

    let public = Router::new().route("/health", get(handlers::health::health));

    public.merge(protected).layer(Extension(service))
}
