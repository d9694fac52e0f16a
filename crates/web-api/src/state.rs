use std::sync::Arc;

use application::ServiceContainer;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub services: ServiceContainer,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(services: ServiceContainer, jwt_service: Arc<JwtService>) -> Self {
        Self {
            services,
            jwt_service,
        }
    }
}
