use r2d2::{Pool, PooledConnection};
use r2d2_oracle::OracleConnectionManager;

use super::config::DbConnection;
use super::SimpleResult;

pub type Datasource = Pool<OracleConnectionManager>;
pub type Connection = PooledConnection<OracleConnectionManager>;

pub fn new_datasource(config: &DbConnection) -> SimpleResult<Datasource> {
    let user = &config.credentials.user;
    let pw = &config.credentials.pw;
    let manager = OracleConnectionManager::new(user, pw, &config.url);
    let pool = r2d2::Pool::builder()
        .max_size(config.pool)
        .build(manager)
        .map_err(|err| format!("Build db {:?} connection pool err: {:?}", &config.url, err))?;

    Ok(pool)
}

pub fn get_connection(datasource: &Datasource) -> SimpleResult<Connection> {
    datasource
        .get()
        .map_err(|err| format!("Connect to db err: {:?}", err))
}
