use proc_macro2::TokenStream;
use syn::spanned::Spanned;
use quote::{quote, quote_spanned};

use crate::internals::Ctxt;
use crate::internals::ast::Container;

/// Expands #[derive(RowValue)] macro.
pub fn expand_derive_row_value(input: &syn::DeriveInput) -> Result<TokenStream, Vec<syn::Error>> {
    let ctxt = Ctxt::new();

    let cont = match Container::from_ast(&ctxt, input) {
        Some(cont) => cont,
        None => return Err(ctxt.check().unwrap_err()),
    };

    ctxt.check()?;

    let name = cont.ident;
    let (impl_generics, ty_generics, where_clause) = cont.generics.split_for_impl();

    let doc_comment = format!("Read `{}` from a result row by column name.", name);

    let body = generate_from_columns(&cont);

    Ok(quote! {
        impl #impl_generics oracle::RowValue for #name #ty_generics #where_clause {
            #[doc = #doc_comment]
            fn get(row: &oracle::Row) -> std::result::Result<#name #ty_generics, oracle::Error> {
                Ok(#body)
            }
        }
    })
}

/// Generate body, for example:
///         UserRow { id: row.get("ID")?, external_id: row.get("FIREBASE_UID")? }
fn generate_from_columns(cont: &Container) -> TokenStream {
    let expressions = cont.fields.iter().map(|f| {
        let ident = f.ident;
        let column = &f.column;
        quote_spanned! { f.original.span() => #ident: row.get(#column)? }
    });
    let name = cont.ident;
    quote! {
        #name { #(#expressions),* }
    }
}
