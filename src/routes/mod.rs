pub mod auth;
pub mod messages;
pub mod notifications;
pub mod posts;
pub mod search;
pub mod uploads;
pub mod users;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(posts::router())
        .merge(users::router())
        .merge(notifications::router())
        .merge(messages::router())
        .merge(search::router())
        .merge(uploads::router())
}
