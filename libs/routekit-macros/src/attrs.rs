//! Method-level route attributes.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Attribute, LitBool, LitStr, Meta, Token};

const VERBS: &[(&str, &str)] = &[
    ("get", "Get"),
    ("post", "Post"),
    ("put", "Put"),
    ("delete", "Delete"),
    ("patch", "Patch"),
    ("head", "Head"),
    ("options", "Options"),
    ("trace", "Trace"),
    ("connect", "Connect"),
];

const MARKERS: &[&str] = &["handler", "blocking", "failure", "sockjs", "consumer", "auth"];

struct Verb {
    variant: &'static str,
    value: String,
    regex: bool,
}

/// Route attributes found on one method.
#[derive(Default)]
pub struct RouteAttrs {
    handler: bool,
    blocking: bool,
    failure: bool,
    socket: Option<String>,
    consumer: Option<String>,
    verbs: Vec<Verb>,
    /// `Some(None)` is `#[auth]` with the default identity.
    auth: Option<Option<String>>,
}

impl RouteAttrs {
    pub fn is_route(&self) -> bool {
        self.handler
            || self.blocking
            || self.failure
            || self.socket.is_some()
            || self.consumer.is_some()
            || !self.verbs.is_empty()
    }

    pub fn is_socket(&self) -> bool {
        self.socket.is_some()
    }

    /// `MethodAnnotations` builder expression.
    pub fn to_tokens(&self) -> TokenStream {
        let mut calls = Vec::new();
        if self.handler {
            calls.push(quote!(.with_handler()));
        }
        if self.blocking {
            calls.push(quote!(.with_blocking()));
        }
        if self.failure {
            calls.push(quote!(.with_failure()));
        }
        if let Some(path) = &self.socket {
            calls.push(quote!(.with_socket(#path)));
        }
        if let Some(address) = &self.consumer {
            calls.push(quote!(.with_consumer(#address)));
        }
        for verb in &self.verbs {
            let variant = format_ident!("{}", verb.variant);
            let value = &verb.value;
            let ctor = if verb.regex {
                quote!(regex)
            } else {
                quote!(new)
            };
            calls.push(quote! {
                .with_verb(::routekit::model::VerbAnnotation::#ctor(
                    ::routekit::HttpMethod::#variant,
                    #value,
                ))
            });
        }
        match &self.auth {
            Some(Some(identity)) => calls.push(quote!(.with_auth(#identity))),
            Some(None) => calls.push(quote!(.with_auth(::routekit::DEFAULT_AUTH_HANDLER_KEY))),
            None => {}
        }
        quote! {
            ::routekit::model::MethodAnnotations::default() #(#calls)*
        }
    }
}

fn attr_name(attr: &Attribute) -> Option<String> {
    attr.path().get_ident().map(|i| i.to_string())
}

fn is_route_attr(attr: &Attribute) -> bool {
    match attr_name(attr) {
        Some(name) => {
            MARKERS.contains(&name.as_str()) || VERBS.iter().any(|(v, _)| *v == name)
        }
        None => false,
    }
}

/// Removes route attributes from `attrs` and returns what they declared.
pub fn take_route_attrs(attrs: &mut Vec<Attribute>) -> syn::Result<RouteAttrs> {
    let (ours, rest): (Vec<_>, Vec<_>) = attrs.drain(..).partition(is_route_attr);
    *attrs = rest;

    let mut out = RouteAttrs::default();
    let mut socket_attr = None;
    let mut consumer_attr = None;
    let mut auth_attr = None;
    for attr in ours {
        let name = attr_name(&attr).unwrap_or_default();
        match name.as_str() {
            "handler" => out.handler = flag(&attr, out.handler)?,
            "blocking" => out.blocking = flag(&attr, out.blocking)?,
            "failure" => out.failure = flag(&attr, out.failure)?,
            "sockjs" => {
                reject_duplicate(&attr, out.socket.is_some())?;
                out.socket = Some(optional_str(&attr)?.unwrap_or_default());
                socket_attr = Some(attr);
            }
            "consumer" => {
                reject_duplicate(&attr, out.consumer.is_some())?;
                match optional_str(&attr)? {
                    Some(address) => {
                        out.consumer = Some(address);
                        consumer_attr = Some(attr);
                    }
                    None => {
                        return Err(syn::Error::new_spanned(
                            attr,
                            "`consumer` requires an address, e.g. #[consumer(\"orders.created\")]",
                        ))
                    }
                }
            }
            "auth" => {
                reject_duplicate(&attr, out.auth.is_some())?;
                out.auth = Some(optional_str(&attr)?);
                auth_attr = Some(attr);
            }
            verb => {
                let variant = VERBS
                    .iter()
                    .find(|(v, _)| *v == verb)
                    .map(|(_, variant)| *variant)
                    .ok_or_else(|| syn::Error::new_spanned(&attr, "unknown route attribute"))?;
                out.verbs.push(parse_verb(&attr, variant)?);
            }
        }
    }
    check_combination(&out, socket_attr, consumer_attr, auth_attr)?;
    Ok(out)
}

fn check_combination(
    out: &RouteAttrs,
    socket: Option<Attribute>,
    consumer: Option<Attribute>,
    auth: Option<Attribute>,
) -> syn::Result<()> {
    if let Some(attr) = consumer {
        let http_or_socket = out.handler
            || out.blocking
            || out.failure
            || out.socket.is_some()
            || !out.verbs.is_empty();
        if http_or_socket {
            return Err(syn::Error::new_spanned(
                attr,
                "`consumer` cannot be combined with HTTP or socket route attributes",
            ));
        }
    }
    if let Some(attr) = socket {
        if !out.verbs.is_empty() {
            return Err(syn::Error::new_spanned(
                attr,
                "`sockjs` cannot be combined with HTTP verb attributes",
            ));
        }
    }
    if let Some(attr) = auth {
        if !out.is_route() {
            return Err(syn::Error::new_spanned(
                attr,
                "`auth` needs a route attribute, e.g. #[get] or #[handler]",
            ));
        }
    }
    Ok(())
}

fn flag(attr: &Attribute, seen: bool) -> syn::Result<bool> {
    reject_duplicate(attr, seen)?;
    match &attr.meta {
        Meta::Path(_) => Ok(true),
        other => Err(syn::Error::new_spanned(other, "this attribute takes no arguments")),
    }
}

fn reject_duplicate(attr: &Attribute, seen: bool) -> syn::Result<()> {
    if seen {
        return Err(syn::Error::new_spanned(attr, "duplicate attribute"));
    }
    Ok(())
}

fn optional_str(attr: &Attribute) -> syn::Result<Option<String>> {
    match &attr.meta {
        Meta::Path(_) => Ok(None),
        Meta::List(_) => attr.parse_args::<LitStr>().map(|s| Some(s.value())),
        Meta::NameValue(nv) => Err(syn::Error::new_spanned(
            nv,
            "expected a parenthesized string literal",
        )),
    }
}

enum VerbArg {
    Path(LitStr),
    Regex(LitBool),
}

impl Parse for VerbArg {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.peek(LitStr) {
            return input.parse().map(VerbArg::Path);
        }
        let key: syn::Ident = input.parse()?;
        if key != "regex" {
            return Err(syn::Error::new(
                key.span(),
                "unknown parameter; expected a path string or `regex = true|false`",
            ));
        }
        input.parse::<Token![=]>()?;
        input.parse().map(VerbArg::Regex)
    }
}

fn parse_verb(attr: &Attribute, variant: &'static str) -> syn::Result<Verb> {
    let mut verb = Verb {
        variant,
        value: String::new(),
        regex: false,
    };
    if let Meta::Path(_) = attr.meta {
        return Ok(verb);
    }
    let args = attr.parse_args_with(Punctuated::<VerbArg, Token![,]>::parse_terminated)?;
    let mut has_path = false;
    for arg in args {
        match arg {
            VerbArg::Path(lit) => {
                if has_path {
                    return Err(syn::Error::new_spanned(lit, "duplicate path"));
                }
                has_path = true;
                verb.value = lit.value();
            }
            VerbArg::Regex(flag) => verb.regex = flag.value,
        }
    }
    if verb.regex && verb.value.is_empty() {
        return Err(syn::Error::new_spanned(
            attr,
            "`regex = true` needs a non-empty pattern",
        ));
    }
    Ok(verb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::ImplItemFn;

    fn attrs_of(method: ImplItemFn) -> (RouteAttrs, Vec<Attribute>) {
        let mut attrs = method.attrs;
        let parsed = take_route_attrs(&mut attrs).unwrap();
        (parsed, attrs)
    }

    #[test]
    fn strips_route_attributes_and_keeps_others() {
        let m: ImplItemFn = syn::parse_quote! {
            #[doc = "lists"]
            #[get("/items")]
            #[post]
            #[auth]
            #[allow(unused)]
            async fn list(&self) {}
        };
        let (parsed, rest) = attrs_of(m);
        assert_eq!(rest.len(), 2);
        assert_eq!(parsed.verbs.len(), 2);
        assert_eq!(parsed.verbs[0].value, "/items");
        assert_eq!(parsed.verbs[1].variant, "Post");
        assert!(matches!(parsed.auth, Some(None)));
        assert!(parsed.is_route());
    }

    #[test]
    fn regex_verbs_and_markers() {
        let m: ImplItemFn = syn::parse_quote! {
            #[get("/files/(\\d+)", regex = true)]
            #[blocking]
            #[auth("jwt")]
            fn file(&self) {}
        };
        let (parsed, _) = attrs_of(m);
        assert!(parsed.verbs[0].regex);
        assert!(parsed.blocking);
        assert!(matches!(parsed.auth, Some(Some(ref id)) if id == "jwt"));
    }

    #[test]
    fn consumer_needs_an_address() {
        let m: ImplItemFn = syn::parse_quote! {
            #[consumer]
            async fn on_event(&self) {}
        };
        let mut attrs = m.attrs;
        assert!(take_route_attrs(&mut attrs).is_err());
    }

    #[test]
    fn regex_without_pattern_is_rejected() {
        let m: ImplItemFn = syn::parse_quote! {
            #[get(regex = true)]
            fn any(&self) {}
        };
        let mut attrs = m.attrs;
        assert!(take_route_attrs(&mut attrs).is_err());
    }

    fn rejection(m: ImplItemFn) -> String {
        let mut attrs = m.attrs;
        match take_route_attrs(&mut attrs) {
            Err(e) => e.to_string(),
            Ok(_) => panic!("attributes were accepted"),
        }
    }

    #[test]
    fn consumer_stays_off_http_routes() {
        let err = rejection(syn::parse_quote! {
            #[handler]
            #[consumer("orders.created")]
            async fn on_order(&self) {}
        });
        assert!(err.contains("`consumer` cannot be combined"), "{err}");
    }

    #[test]
    fn socket_rejects_verbs() {
        let err = rejection(syn::parse_quote! {
            #[get("/room")]
            #[sockjs("room")]
            async fn room(&self) {}
        });
        assert!(err.contains("`sockjs` cannot be combined"), "{err}");
    }

    #[test]
    fn auth_alone_is_rejected() {
        let err = rejection(syn::parse_quote! {
            #[auth("jwt")]
            fn helper(&self) {}
        });
        assert!(err.contains("`auth` needs a route attribute"), "{err}");
    }

    #[test]
    fn socket_with_auth_is_accepted() {
        let (parsed, _) = attrs_of(syn::parse_quote! {
            #[sockjs("room")]
            #[auth]
            async fn room(&self) {}
        });
        assert!(parsed.is_socket());
        assert!(parsed.auth.is_some());
    }

    #[test]
    fn plain_methods_are_not_routes() {
        let m: ImplItemFn = syn::parse_quote! {
            #[inline]
            fn helper(&self) {}
        };
        let (parsed, rest) = attrs_of(m);
        assert!(!parsed.is_route());
        assert_eq!(rest.len(), 1);
    }
}
