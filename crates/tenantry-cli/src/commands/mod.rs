pub mod check;
pub mod platform;
pub mod reconcile;
pub mod serve;

pub use check::CheckCommand;
pub use reconcile::ReconcileCommand;
pub use serve::ServeCommand;
