pub mod config;
mod datasource;
mod setup;

pub use setup::setup_logging;
pub use setup::setup_tls;
pub use setup::setup_gate;
pub use setup::setup_state;
pub use self::config::load_config;

pub use datasource::{
    get_connection,
    new_datasource,
    Connection,
    Datasource,
};

pub type SimpleResult<T> = Result<T, String>;
