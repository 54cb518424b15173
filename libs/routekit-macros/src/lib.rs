//! Procedural macros for routekit.
//!
//! `#[controller]` goes on an inherent `impl` block. It reads the route
//! attributes on each method, strips them, and emits a
//! `routekit::Controller` impl plus an inventory registration so package
//! scans can find the type.

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemImpl};

mod attrs;
mod controller;

/// Turns an `impl` block into a routekit controller.
///
/// Options: `sub_router` or `sub_router = "/prefix"`, `ctor = expr`,
/// `provided` (instances come from the builder's instantiator) and
/// `scan = false` (skip package-scan registration).
///
/// Method attributes: `#[get]`, `#[post("path")]`, `#[get("re", regex = true)]`
/// and the other verbs, `#[handler]`, `#[blocking]`, `#[failure]`,
/// `#[sockjs("path")]`, `#[consumer("address")]`, `#[auth]`,
/// `#[auth("identity")]`.
#[proc_macro_attribute]
pub fn controller(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as controller::ControllerConfig);
    let input = parse_macro_input!(item as ItemImpl);
    match controller::expand(config, input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}
