//! `#[derive(RpcMethod)]`: generates the `eventide_jsonrpc::RpcMethod` impl
//! for a params type from a `#[rpc(method = "...", result = "...")]`
//! attribute, so call sites write `peer.send_request(AddParams { .. })`
//! instead of hand-writing the trait impl and method-name string per type.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, LitStr, Type};

struct RpcAttr {
    method: LitStr,
    result: Type,
}

#[proc_macro_derive(RpcMethod, attributes(rpc))]
pub fn derive_rpc_method(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let attr = parse_rpc_attr(input)?;
    let RpcAttr { method, result } = attr;
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics eventide_jsonrpc::RpcMethod for #name #ty_generics #where_clause {
            const METHOD: &'static str = #method;
            type Output = #result;
        }
    })
}

fn parse_rpc_attr(input: &DeriveInput) -> syn::Result<RpcAttr> {
    let mut method = None;
    let mut result = None;

    for attr in &input.attrs {
        if !attr.path().is_ident("rpc") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("method") {
                let lit: LitStr = meta.value()?.parse()?;
                method = Some(lit);
                Ok(())
            } else if meta.path.is_ident("result") {
                let lit: LitStr = meta.value()?.parse()?;
                result = Some(lit.parse::<Type>()?);
                Ok(())
            } else {
                Err(meta.error("unrecognized `rpc` key, expected `method` or `result`"))
            }
        })?;
    }

    let method = method.ok_or_else(|| {
        syn::Error::new(
            proc_macro2::Span::call_site(),
            "missing #[rpc(method = \"...\")] attribute",
        )
    })?;
    let result = result.ok_or_else(|| {
        syn::Error::new(
            proc_macro2::Span::call_site(),
            "missing #[rpc(result = \"...\")] attribute",
        )
    })?;

    Ok(RpcAttr { method, result })
}
