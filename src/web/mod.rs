mod control;
mod handlers;
mod routes;
mod ws;

pub use control::ControlRouter;
pub use routes::create_router;
pub use ws::ws_handler;
