// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `#[logged_test]` for codefs crates.
//!
//! The attribute wraps a test in a [`codefs_test_utils::TestLoggerGuard`]: the
//! test gets a unique log file, `tracing` output emitted on the test thread is
//! captured into it, and the guard records success or failure when the body
//! finishes or unwinds. The body can write to the log through `logger`.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, ItemFn, ReturnType, Type};

/// Attribute macro for synchronous tests.
///
/// ```rust,ignore
/// #[codefs_test_utils::logged_test]
/// fn opens_file() {
///     logger.log("opening /a").unwrap();
/// }
/// ```
#[proc_macro_attribute]
pub fn logged_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            Span::call_site(),
            "#[logged_test] does not accept arguments",
        )
        .to_compile_error()
        .into();
    }

    let input = parse_macro_input!(item as ItemFn);

    if let Some(async_token) = &input.sig.asyncness {
        return syn::Error::new(
            async_token.span(),
            "#[logged_test] wraps synchronous tests only",
        )
        .to_compile_error()
        .into();
    }

    if !input.sig.inputs.is_empty() {
        return syn::Error::new(
            input.sig.ident.span(),
            "#[logged_test] can only be applied to functions without parameters",
        )
        .to_compile_error()
        .into();
    }

    expand(input).into()
}

fn expand(mut input: ItemFn) -> TokenStream2 {
    input.attrs.retain(|attr| !attr.path().is_ident("logged_test"));

    let fn_ident = &input.sig.ident;
    let fn_name = fn_ident.to_string();
    let visibility = &input.vis;
    let generics = &input.sig.generics;
    let output = &input.sig.output;
    let block = &input.block;
    let other_attrs = &input.attrs;

    let finish = if returns_result(output) {
        quote! {
            match inner_result {
                ::std::result::Result::Ok(value) => {
                    if let Err(e) = __guard.finish_success() {
                        panic!("failed to finalize test log: {}", e);
                    }
                    ::std::result::Result::Ok(value)
                }
                ::std::result::Result::Err(err) => {
                    let __message = format!("{}", err);
                    if let Err(e) = __guard.finish_failure(&__message) {
                        eprintln!("failed to finalize test log after error: {}", e);
                    }
                    ::std::result::Result::Err(err)
                }
            }
        }
    } else {
        quote! {
            if let Err(e) = __guard.finish_success() {
                panic!("failed to finalize test log: {}", e);
            }
            inner_result
        }
    };

    quote! {
        #[::core::prelude::v1::test]
        #(#other_attrs)*
        #visibility fn #fn_ident #generics () #output {
            let mut __guard = ::codefs_test_utils::TestLoggerGuard::new(#fn_name)
                .expect("failed to create test log");
            let mut logger = __guard.logger();
            let _ = &mut logger;

            let inner_result = { #block };
            #finish
        }
    }
}

fn returns_result(output: &ReturnType) -> bool {
    match output {
        ReturnType::Default => false,
        ReturnType::Type(_, ty) => match ty.as_ref() {
            Type::Path(type_path) => type_path
                .path
                .segments
                .last()
                .is_some_and(|segment| segment.ident == "Result"),
            _ => false,
        },
    }
}
