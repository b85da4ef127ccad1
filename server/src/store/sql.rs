use chrono::{DateTime, Utc};
use itertools::Itertools;
use oracle::sql_type::ToSql;

use row_derive::RowValue;

use super::{StoreError, StoreResult, TransactionStore, UserDirectory};
use crate::model::{
    month_key,
    ListQuery,
    MonthlySummary,
    ProfileUpdate,
    Transaction,
    TransactionInput,
    TransactionType,
    UserRecord,
    DEFAULT_PLAN,
};
use crate::server::{get_connection, Connection, Datasource};

// ORA-00001: unique constraint violated
const UNIQUE_VIOLATION: i32 = 1;

const USER_COLUMNS: &str =
    "ID, FIREBASE_UID, EMAIL, DISPLAY_NAME, BUSINESS_NAME, LICENSE_NUMBER, PLAN, CREATED_AT, UPDATED_AT";

const TRANSACTION_COLUMNS: &str = "ID, USER_ID, TRANSACTION_TYPE, ITEM_NAME, ITEM_CATEGORY, QUANTITY, PRICE, \
    TRANSACTION_DATE, COUNTERPARTY_NAME, COUNTERPARTY_ADDRESS, COUNTERPARTY_AGE, COUNTERPARTY_OCCUPATION, \
    ID_VERIFICATION_TYPE, ID_VERIFICATION_NUMBER, PHOTO_URL, NOTES, CREATED_AT, UPDATED_AT";

fn db_error(context: &str, err: oracle::Error) -> StoreError {
    if let oracle::Error::OciError(ref db) = err {
        if db.code() == UNIQUE_VIOLATION {
            return StoreError::Conflict;
        }
    }
    StoreError::Backend(format!("{}: {}", context, err))
}

fn connect(datasource: &Datasource) -> StoreResult<Connection> {
    get_connection(datasource).map_err(StoreError::Backend)
}

/// `%` and `_` in user input match literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        if c == '\\' || c == '%' || c == '_' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(RowValue)]
struct UserRow {
    id: String,
    #[row(column = "FIREBASE_UID")]
    external_id: String,
    email: String,
    display_name: Option<String>,
    business_name: Option<String>,
    license_number: Option<String>,
    plan: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        UserRecord {
            id: row.id,
            external_id: row.external_id,
            email: row.email,
            display_name: row.display_name,
            business_name: row.business_name,
            license_number: row.license_number,
            plan: row.plan.unwrap_or_else(|| DEFAULT_PLAN.to_string()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// User directory over the `USERS` table.
pub struct OracleUserDirectory {
    datasource: Datasource,
}

impl OracleUserDirectory {
    pub fn new(datasource: Datasource) -> Self {
        OracleUserDirectory { datasource }
    }
}

fn find_user(conn: &Connection, external_id: &str) -> StoreResult<Option<UserRecord>> {
    let sql = format!("SELECT {} FROM USERS WHERE FIREBASE_UID = :1", USER_COLUMNS);
    match conn.query_row_as::<UserRow>(&sql, &[&external_id]) {
        Ok(row) => Ok(Some(row.into())),
        Err(oracle::Error::NoDataFound) => Ok(None),
        Err(err) => Err(db_error("query user", err)),
    }
}

impl UserDirectory for OracleUserDirectory {
    fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<UserRecord>> {
        let conn = connect(&self.datasource)?;
        find_user(&conn, external_id)
    }

    fn insert(&self, user: &UserRecord) -> StoreResult<()> {
        let conn = connect(&self.datasource)?;
        let sql = format!(
            "INSERT INTO USERS ({}) VALUES (:1, :2, :3, :4, :5, :6, :7, :8, :9)",
            USER_COLUMNS
        );
        conn.execute(
            &sql,
            &[
                &user.id,
                &user.external_id,
                &user.email,
                &user.display_name,
                &user.business_name,
                &user.license_number,
                &user.plan,
                &user.created_at,
                &user.updated_at,
            ],
        )
        .map_err(|err| db_error("insert user", err))?;
        conn.commit().map_err(|err| db_error("commit user", err))
    }

    fn update_profile(
        &self,
        external_id: &str,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserRecord>> {
        let mut columns: Vec<&str> = Vec::with_capacity(4);
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(5);
        if let Some(value) = &update.display_name {
            columns.push("DISPLAY_NAME");
            params.push(value);
        }
        if let Some(value) = &update.business_name {
            columns.push("BUSINESS_NAME");
            params.push(value);
        }
        if let Some(value) = &update.license_number {
            columns.push("LICENSE_NUMBER");
            params.push(value);
        }
        columns.push("UPDATED_AT");
        params.push(&now);
        params.push(&external_id);

        let assignments = columns
            .iter()
            .enumerate()
            .map(|(idx, column)| format!("{} = :{}", column, idx + 1))
            .join(", ");
        let sql = format!("UPDATE USERS SET {} WHERE FIREBASE_UID = :{}", assignments, params.len());

        let conn = connect(&self.datasource)?;
        let stmt = conn
            .execute(&sql, &params)
            .map_err(|err| db_error("update user", err))?;
        let touched = stmt.row_count().map_err(|err| db_error("update user", err))?;
        if touched == 0 {
            return Ok(None);
        }
        conn.commit().map_err(|err| db_error("commit user", err))?;
        find_user(&conn, external_id)
    }
}

#[derive(RowValue)]
struct TransactionRow {
    id: String,
    user_id: String,
    transaction_type: String,
    item_name: String,
    item_category: Option<String>,
    quantity: i64,
    price: i64,
    transaction_date: String,
    counterparty_name: String,
    counterparty_address: String,
    counterparty_age: Option<i64>,
    counterparty_occupation: Option<String>,
    id_verification_type: String,
    id_verification_number: Option<String>,
    photo_url: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_transaction(self) -> StoreResult<Transaction> {
        let transaction_type = TransactionType::parse(&self.transaction_type).ok_or_else(|| {
            StoreError::Backend(format!(
                "transaction {} has unknown type {:?}",
                self.id, self.transaction_type
            ))
        })?;
        Ok(Transaction {
            id: self.id,
            user_id: self.user_id,
            details: TransactionInput {
                transaction_type,
                item_name: self.item_name,
                item_category: self.item_category,
                quantity: self.quantity,
                price: self.price,
                transaction_date: self.transaction_date,
                counterparty_name: self.counterparty_name,
                counterparty_address: self.counterparty_address,
                counterparty_age: self.counterparty_age,
                counterparty_occupation: self.counterparty_occupation,
                id_verification_type: self.id_verification_type,
                id_verification_number: self.id_verification_number,
                photo_url: self.photo_url,
                notes: self.notes,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(RowValue)]
struct SummaryRow {
    #[row(column = "TOTAL_COUNT")]
    count: i64,
    buy_count: i64,
    sell_count: i64,
    buy_total: i64,
    sell_total: i64,
}

/// Transaction records over the `TRANSACTIONS` table.
pub struct OracleTransactionStore {
    datasource: Datasource,
}

impl OracleTransactionStore {
    pub fn new(datasource: Datasource) -> Self {
        OracleTransactionStore { datasource }
    }
}

fn find_transaction(conn: &Connection, user_id: &str, id: &str) -> StoreResult<Option<Transaction>> {
    let sql = format!(
        "SELECT {} FROM TRANSACTIONS WHERE ID = :1 AND USER_ID = :2",
        TRANSACTION_COLUMNS
    );
    match conn.query_row_as::<TransactionRow>(&sql, &[&id, &user_id]) {
        Ok(row) => row.into_transaction().map(Some),
        Err(oracle::Error::NoDataFound) => Ok(None),
        Err(err) => Err(db_error("query transaction", err)),
    }
}

impl TransactionStore for OracleTransactionStore {
    fn list(&self, user_id: &str, query: &ListQuery) -> StoreResult<Vec<Transaction>> {
        let pattern = query.search.as_ref().map(|s| format!("%{}%", escape_like(s)));
        let offset = i64::from(query.offset());
        let limit = i64::from(query.limit);

        let mut sql = format!("SELECT {} FROM TRANSACTIONS WHERE USER_ID = :1", TRANSACTION_COLUMNS);
        let mut params: Vec<&dyn ToSql> = vec![&user_id];
        if let Some(pattern) = &pattern {
            sql.push_str(" AND (ITEM_NAME LIKE :2 ESCAPE '\\' OR COUNTERPARTY_NAME LIKE :3 ESCAPE '\\')");
            params.push(pattern);
            params.push(pattern);
        }
        sql.push_str(&format!(
            " ORDER BY TRANSACTION_DATE DESC, CREATED_AT DESC OFFSET :{} ROWS FETCH NEXT :{} ROWS ONLY",
            params.len() + 1,
            params.len() + 2
        ));
        params.push(&offset);
        params.push(&limit);

        let conn = connect(&self.datasource)?;
        let mut stmt = conn
            .statement(&sql)
            .fetch_array_size(query.limit)
            .build()
            .map_err(|err| db_error("prepare transaction list", err))?;
        let rows = stmt
            .query_as::<TransactionRow>(&params)
            .map_err(|err| db_error("query transaction list", err))?;

        rows.map(|row| {
            row.map_err(|err| db_error("fetch transaction", err))
                .and_then(TransactionRow::into_transaction)
        })
        .collect()
    }

    fn get(&self, user_id: &str, id: &str) -> StoreResult<Option<Transaction>> {
        let conn = connect(&self.datasource)?;
        find_transaction(&conn, user_id, id)
    }

    fn insert(&self, t: &Transaction) -> StoreResult<()> {
        let d = &t.details;
        let kind = d.transaction_type.as_str();
        let sql = format!(
            "INSERT INTO TRANSACTIONS ({}) VALUES \
             (:1, :2, :3, :4, :5, :6, :7, :8, :9, :10, :11, :12, :13, :14, :15, :16, :17, :18)",
            TRANSACTION_COLUMNS
        );
        let conn = connect(&self.datasource)?;
        conn.execute(
            &sql,
            &[
                &t.id,
                &t.user_id,
                &kind,
                &d.item_name,
                &d.item_category,
                &d.quantity,
                &d.price,
                &d.transaction_date,
                &d.counterparty_name,
                &d.counterparty_address,
                &d.counterparty_age,
                &d.counterparty_occupation,
                &d.id_verification_type,
                &d.id_verification_number,
                &d.photo_url,
                &d.notes,
                &t.created_at,
                &t.updated_at,
            ],
        )
        .map_err(|err| db_error("insert transaction", err))?;
        conn.commit().map_err(|err| db_error("commit transaction", err))
    }

    fn update(
        &self,
        user_id: &str,
        id: &str,
        d: &TransactionInput,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Transaction>> {
        let kind = d.transaction_type.as_str();
        let sql = "UPDATE TRANSACTIONS SET \
                   TRANSACTION_TYPE = :1, ITEM_NAME = :2, ITEM_CATEGORY = :3, QUANTITY = :4, PRICE = :5, \
                   TRANSACTION_DATE = :6, COUNTERPARTY_NAME = :7, COUNTERPARTY_ADDRESS = :8, \
                   COUNTERPARTY_AGE = :9, COUNTERPARTY_OCCUPATION = :10, ID_VERIFICATION_TYPE = :11, \
                   ID_VERIFICATION_NUMBER = :12, PHOTO_URL = :13, NOTES = :14, UPDATED_AT = :15 \
                   WHERE ID = :16 AND USER_ID = :17";
        let conn = connect(&self.datasource)?;
        let stmt = conn
            .execute(
                sql,
                &[
                    &kind,
                    &d.item_name,
                    &d.item_category,
                    &d.quantity,
                    &d.price,
                    &d.transaction_date,
                    &d.counterparty_name,
                    &d.counterparty_address,
                    &d.counterparty_age,
                    &d.counterparty_occupation,
                    &d.id_verification_type,
                    &d.id_verification_number,
                    &d.photo_url,
                    &d.notes,
                    &now,
                    &id,
                    &user_id,
                ],
            )
            .map_err(|err| db_error("update transaction", err))?;
        let touched = stmt.row_count().map_err(|err| db_error("update transaction", err))?;
        if touched == 0 {
            return Ok(None);
        }
        conn.commit().map_err(|err| db_error("commit transaction", err))?;
        find_transaction(&conn, user_id, id)
    }

    fn delete(&self, user_id: &str, id: &str) -> StoreResult<bool> {
        let conn = connect(&self.datasource)?;
        let stmt = conn
            .execute("DELETE FROM TRANSACTIONS WHERE ID = :1 AND USER_ID = :2", &[&id, &user_id])
            .map_err(|err| db_error("delete transaction", err))?;
        let removed = stmt.row_count().map_err(|err| db_error("delete transaction", err))?;
        conn.commit().map_err(|err| db_error("commit transaction", err))?;
        Ok(removed > 0)
    }

    fn count_created_since(&self, user_id: &str, since: DateTime<Utc>) -> StoreResult<u64> {
        let conn = connect(&self.datasource)?;
        let count = conn
            .query_row_as::<i64>(
                "SELECT COUNT(*) FROM TRANSACTIONS WHERE USER_ID = :1 AND CREATED_AT >= :2",
                &[&user_id, &since],
            )
            .map_err(|err| db_error("count transactions", err))?;
        Ok(count.max(0) as u64)
    }

    fn count_all(&self, user_id: &str) -> StoreResult<u64> {
        let conn = connect(&self.datasource)?;
        let count = conn
            .query_row_as::<i64>("SELECT COUNT(*) FROM TRANSACTIONS WHERE USER_ID = :1", &[&user_id])
            .map_err(|err| db_error("count transactions", err))?;
        Ok(count.max(0) as u64)
    }

    fn monthly_summary(&self, user_id: &str, year: i32, month: u32) -> StoreResult<MonthlySummary> {
        let prefix = month_key(year, month);
        let conn = connect(&self.datasource)?;
        let row = conn
            .query_row_as::<SummaryRow>(
                "SELECT COUNT(*) AS TOTAL_COUNT, \
                 NVL(SUM(CASE WHEN TRANSACTION_TYPE = 'buy' THEN 1 ELSE 0 END), 0) AS BUY_COUNT, \
                 NVL(SUM(CASE WHEN TRANSACTION_TYPE = 'sell' THEN 1 ELSE 0 END), 0) AS SELL_COUNT, \
                 NVL(SUM(CASE WHEN TRANSACTION_TYPE = 'buy' THEN PRICE ELSE 0 END), 0) AS BUY_TOTAL, \
                 NVL(SUM(CASE WHEN TRANSACTION_TYPE = 'sell' THEN PRICE ELSE 0 END), 0) AS SELL_TOTAL \
                 FROM TRANSACTIONS WHERE USER_ID = :1 AND SUBSTR(TRANSACTION_DATE, 1, 7) = :2",
                &[&user_id, &prefix],
            )
            .map_err(|err| db_error("summarize transactions", err))?;
        Ok(MonthlySummary {
            year,
            month,
            count: row.count,
            buy_count: row.buy_count,
            sell_count: row.sell_count,
            buy_total: row.buy_total,
            sell_total: row.sell_total,
        })
    }
}
