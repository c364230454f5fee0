use std::sync::Arc;

use crate::{
    config::PaymentConfig,
    db::{DbPool, OrmConn},
    gateway::Gateways,
    notify::Notifier,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub payments: PaymentConfig,
    pub gateways: Arc<Gateways>,
    pub notifier: Arc<dyn Notifier>,
}
