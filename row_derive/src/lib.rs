extern crate quote;

#[macro_use]
extern crate syn;

extern crate proc_macro;
use proc_macro::TokenStream;

use syn::{parse_macro_input, DeriveInput};

mod internals;
mod row;
mod utils;

/// Generate `oracle::RowValue` in form of #[derive(RowValue)].
///
/// Fields are read by column name, not position, so the select list may be
/// in any order. The column name is the upper-cased field name unless
/// overridden with `#[row(column = "...")]`.
///
/// example:
/// #[derive(RowValue)]
// struct UserRow {
//     id: String,
//     #[row(column = "FIREBASE_UID")]
//     external_id: String
// }
//
/// impl oracle::RowValue for UserRow {
//     fn get(row: &oracle::Row) -> std::result::Result<UserRow, oracle::Error> {
//           Ok(UserRow {
//               id: row.get("ID")?,
//               external_id: row.get("FIREBASE_UID")?
//          })
//     }
// }
///
#[proc_macro_derive(RowValue, attributes(row))]
pub fn derive_row_value(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    row::expand_derive_row_value(&input)
        .unwrap_or_else(utils::to_compile_errors)
        .into()
}
