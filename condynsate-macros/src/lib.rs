extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, Data, DeriveInput, Fields};

/// Lists every variant of a fieldless enum.
///
/// Implements `crate::utils::enum_tools::ToVec<Self>`, so it can only be
/// derived inside the `condynsate` crate.
#[proc_macro_derive(ToVec)]
pub fn derive_tovec(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let identifier = &input.ident;

    let variants = match &input.data {
        Data::Enum(data) => &data.variants,
        _ => {
            return syn::Error::new(input.span(), "ToVec can only be derived for enums")
                .to_compile_error()
                .into();
        }
    };

    let mut listed = Vec::with_capacity(variants.len());
    for variant in variants {
        if !matches!(variant.fields, Fields::Unit) {
            return syn::Error::new(
                variant.span(),
                "ToVec derive macro requires fieldless variants",
            )
            .to_compile_error()
            .into();
        }
        let id = &variant.ident;
        listed.push(quote! { #identifier::#id });
    }

    quote! {
        #[automatically_derived]
        impl crate::utils::enum_tools::ToVec<#identifier> for #identifier {
            fn to_vec() -> Vec<#identifier> {
                vec![#(#listed),*]
            }
        }
    }
    .into()
}

/// Implements `Display` for an enum by printing the variant name, followed by
/// the debug representation of its fields when it has some.
#[proc_macro_derive(EnumToString)]
pub fn derive_enum_to_string(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let identifier = &input.ident;

    let variants = match &input.data {
        Data::Enum(data) if !data.variants.is_empty() => &data.variants,
        Data::Enum(_) => {
            return syn::Error::new(input.span(), "EnumToString requires at least one variant")
                .to_compile_error()
                .into();
        }
        _ => {
            return syn::Error::new(input.span(), "EnumToString can only be derived for enums")
                .to_compile_error()
                .into();
        }
    };

    let mut arms = TokenStream2::new();
    for variant in variants {
        let id = &variant.ident;
        let name = id.to_string();
        match &variant.fields {
            Fields::Unit => arms.extend(quote! {
                #identifier::#id => f.write_str(#name),
            }),
            Fields::Unnamed(fields) => {
                let bindings: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| syn::Ident::new(&format!("field{i}"), proc_macro2::Span::call_site()))
                    .collect();
                let placeholders = vec!["{:?}"; bindings.len()].join(", ");
                let format_str = format!("{name}({placeholders})");
                arms.extend(quote! {
                    #identifier::#id(#(#bindings),*) => write!(f, #format_str, #(#bindings),*),
                });
            }
            Fields::Named(fields) => {
                let names: Vec<_> = fields.named.iter().filter_map(|f| f.ident.as_ref()).collect();
                let placeholders = names
                    .iter()
                    .map(|n| format!("{n}: {{:?}}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let format_str = format!("{name} {{{{ {placeholders} }}}}");
                arms.extend(quote! {
                    #identifier::#id { #(#names),* } => write!(f, #format_str, #(#names),*),
                });
            }
        }
    }

    quote! {
        #[automatically_derived]
        impl std::fmt::Display for #identifier {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    #arms
                }
            }
        }
    }
    .into()
}

/// Attribute macro that applies the derives shared by every configuration type.
///
/// Structs get `#[serde(default)]` so partial YAML files are accepted, enums get
/// [`EnumToString`]. Unknown fields are rejected unless `skip_unknown_fields` is given.
///
/// Usage: `#[config_derives]`, `#[config_derives(untagged)]`,
/// `#[config_derives(tag_content, skip_unknown_fields)]`.
#[proc_macro_attribute]
pub fn config_derives(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);

    let mut deserialize_derive = quote! { serde::Deserialize, };
    let mut tagged = quote! {};
    let mut unknown_fields = quote! { #[serde(deny_unknown_fields)] };

    let attr_str = attr.to_string();
    for attribute in attr_str.split(',') {
        match attribute.trim() {
            "skip_deserialize" => deserialize_derive = quote! {},
            "tag_content" => tagged = quote! { #[serde(tag = "type", content = "config")] },
            "untagged" => tagged = quote! { #[serde(untagged)] },
            "skip_unknown_fields" => unknown_fields = quote! {},
            "" => {}
            other => {
                return syn::Error::new(
                    input.span(),
                    format!("Unknown attribute '{other}' for config_derives"),
                )
                .to_compile_error()
                .into();
            }
        }
    }

    let kind_attrs = match &input.data {
        Data::Struct(_) => quote! { #[serde(default)] },
        Data::Enum(_) => quote! {
            #[derive(condynsate_macros::EnumToString)]
            #tagged
        },
        Data::Union(_) => {
            return syn::Error::new(input.span(), "config_derives does not support unions")
                .to_compile_error()
                .into();
        }
    };

    quote! {
        #[derive(
            serde::Serialize,
            #deserialize_derive
            Debug,
            Clone,
            PartialEq,
        )]
        #unknown_fields
        #kind_attrs
        #input
    }
    .into()
}
