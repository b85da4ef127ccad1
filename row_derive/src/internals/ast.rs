use syn::punctuated::Punctuated;
use syn::{Lit, Meta, NestedMeta};

use super::ctx::Ctxt;

/// A struct annotated with '#[derive(RowValue)]'
/// parsed into an internal representation.
pub struct Container<'a> {
    /// The struct name (without generics).
    pub ident: &'a syn::Ident,
    /// Named fields in declaration order.
    pub fields: Vec<Field<'a>>,
    /// Any generics on the struct.
    pub generics: &'a syn::Generics,
}

/// A named field and the column it is read from.
pub struct Field<'a> {
    pub ident: &'a syn::Ident,
    pub column: String,
    pub original: &'a syn::Field,
}

impl<'a> Container<'a> {
    /// Convert the raw Syn ast into a parsed container object, collecting errors in `cx`.
    pub fn from_ast(cx: &Ctxt, item: &'a syn::DeriveInput) -> Option<Container<'a>> {
        let fields = match &item.data {
            syn::Data::Struct(data) => match &data.fields {
                syn::Fields::Named(fields) => fields_from_ast(cx, &fields.named),
                _ => {
                    cx.error_spanned_by(item, "RowValue needs a struct with named fields");
                    return None;
                }
            },
            syn::Data::Enum(_) | syn::Data::Union(_) => {
                cx.error_spanned_by(item, "RowValue can only be derived for structs");
                return None;
            }
        };

        Some(Container {
            ident: &item.ident,
            fields,
            generics: &item.generics,
        })
    }
}

fn fields_from_ast<'a>(cx: &Ctxt, fields: &'a Punctuated<syn::Field, Token![,]>) -> Vec<Field<'a>> {
    fields
        .iter()
        .filter_map(|field| {
            let ident = field.ident.as_ref()?;
            let column = column_override(cx, field)
                .unwrap_or_else(|| ident.to_string().to_uppercase());
            Some(Field { ident, column, original: field })
        })
        .collect()
}

/// Reads `#[row(column = "NAME")]`.
fn column_override(cx: &Ctxt, field: &syn::Field) -> Option<String> {
    let mut column = None;
    for attr in field.attrs.iter().filter(|a| a.path.is_ident("row")) {
        let meta = match attr.parse_meta() {
            Ok(meta) => meta,
            Err(err) => {
                cx.error_spanned_by(attr, err);
                continue;
            }
        };
        let list = match meta {
            Meta::List(list) => list,
            other => {
                cx.error_spanned_by(other, "expected #[row(column = \"...\")]");
                continue;
            }
        };
        for nested in list.nested.iter() {
            match nested {
                NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("column") => {
                    match &nv.lit {
                        Lit::Str(s) => column = Some(s.value()),
                        lit => cx.error_spanned_by(lit, "column name must be a string literal"),
                    }
                }
                other => cx.error_spanned_by(other, "unknown row attribute"),
            }
        }
    }
    column
}
