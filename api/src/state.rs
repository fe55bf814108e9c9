use std::sync::Arc;

use sqlx::PgPool;

use crate::routes::chat::{ChatServices, SlidingWindowLimiter};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub chat: Arc<ChatServices>,
    pub limiter: Arc<SlidingWindowLimiter>,
}
