pub mod admin;
pub mod health;
pub mod recommendation;

pub use admin::{get_feature_importance, put_weights};
pub use health::{deep_health, health_check, service_status};
pub use recommendation::recommend;

use actix_web::web;

/// Register every fusion route on an app or scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(recommend)
        .service(health_check)
        .service(deep_health)
        .service(service_status)
        .service(put_weights)
        .service(get_feature_importance);
}
