//! `#[controller]` expansion.

use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{FnArg, ImplItem, ItemImpl, PatType, Signature, Token};

use crate::attrs::{take_route_attrs, RouteAttrs};

const OPTIONS: &[&str] = &["sub_router", "ctor", "provided", "scan"];

pub struct ControllerConfig {
    /// `Some(None)` is `sub_router` without a value.
    sub_router: Option<Option<String>>,
    ctor: Option<syn::Expr>,
    provided: bool,
    scan: bool,
}

fn unknown_option(meta: &syn::Meta) -> syn::Error {
    let name = meta
        .path()
        .get_ident()
        .map(|i| i.to_string())
        .unwrap_or_default();
    let suggestion = OPTIONS
        .iter()
        .map(|o| (o, strsim::jaro_winkler(&name, o)))
        .filter(|(_, score)| *score > 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(o, _)| format!("; did you mean `{o}`?"))
        .unwrap_or_default();
    syn::Error::new_spanned(
        meta,
        format!(
            "unknown parameter; expected one of `sub_router`, `ctor`, `provided`, `scan`{suggestion}"
        ),
    )
}

impl Parse for ControllerConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut config = ControllerConfig {
            sub_router: None,
            ctor: None,
            provided: false,
            scan: true,
        };
        let punctuated: Punctuated<syn::Meta, Token![,]> =
            input.parse_terminated(syn::Meta::parse, Token![,])?;

        for meta in punctuated {
            match &meta {
                syn::Meta::Path(p) if p.is_ident("sub_router") => {
                    if config.sub_router.is_some() {
                        return Err(syn::Error::new_spanned(meta, "duplicate `sub_router`"));
                    }
                    config.sub_router = Some(None);
                }
                syn::Meta::NameValue(nv) if nv.path.is_ident("sub_router") => {
                    if config.sub_router.is_some() {
                        return Err(syn::Error::new_spanned(meta, "duplicate `sub_router`"));
                    }
                    if let syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(s),
                        ..
                    }) = &nv.value
                    {
                        config.sub_router = Some(Some(s.value()));
                    } else {
                        return Err(syn::Error::new_spanned(
                            &nv.value,
                            "sub_router value must be a string literal",
                        ));
                    }
                }
                syn::Meta::NameValue(nv) if nv.path.is_ident("ctor") => {
                    if config.ctor.is_some() {
                        return Err(syn::Error::new_spanned(meta, "duplicate `ctor`"));
                    }
                    config.ctor = Some(nv.value.clone());
                }
                syn::Meta::Path(p) if p.is_ident("provided") => config.provided = true,
                syn::Meta::NameValue(nv) if nv.path.is_ident("scan") => {
                    if let syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Bool(b),
                        ..
                    }) = &nv.value
                    {
                        config.scan = b.value;
                    } else {
                        return Err(syn::Error::new_spanned(
                            &nv.value,
                            "scan value must be `true` or `false`",
                        ));
                    }
                }
                _ => return Err(unknown_option(&meta)),
            }
        }

        if config.provided && config.ctor.is_some() {
            return Err(syn::Error::new(
                Span::call_site(),
                "`provided` and `ctor` are mutually exclusive",
            ));
        }
        Ok(config)
    }
}

fn check_receiver(sig: &Signature) -> syn::Result<Vec<&PatType>> {
    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(r)) if r.reference.is_some() && r.mutability.is_none() => {}
        Some(other) => {
            return Err(syn::Error::new_spanned(
                other,
                "handler methods must begin with &self (not self or &mut self)",
            ))
        }
        None => {
            return Err(syn::Error::new_spanned(
                sig,
                "handler methods must begin with &self",
            ))
        }
    }
    inputs
        .map(|arg| match arg {
            FnArg::Typed(pt) => Ok(pt),
            FnArg::Receiver(r) => Err(syn::Error::new_spanned(r, "unexpected receiver")),
        })
        .collect()
}

fn method_spec(sig: &Signature, attrs: &RouteAttrs) -> syn::Result<TokenStream> {
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "handler methods cannot be generic",
        ));
    }
    let params = check_receiver(sig)?;
    if attrs.is_socket() && params.is_empty() {
        return Err(syn::Error::new_spanned(
            sig,
            "socket handlers take the session as their only parameter",
        ));
    }

    let ident = &sig.ident;
    let name = ident.to_string();
    let arity = params.len();
    let await_ = if sig.asyncness.is_some() {
        quote!(.await)
    } else {
        quote!()
    };

    let call = |args: TokenStream| {
        quote! {
            let __out = __this.#ident(#args)#await_;
            ::routekit::IntoHandlerOutcome::into_outcome(__out)
        }
    };

    let (input, body) = match params.as_slice() {
        [] => (quote!(::std::option::Option::None), call(quote!())),
        [param] => {
            let ty = &param.ty;
            let invoke = call(quote!(__arg));
            (
                quote!(::std::option::Option::Some(
                    <#ty as ::routekit::FromInput>::KIND
                )),
                quote! {
                    match <#ty as ::routekit::FromInput>::from_input(__input) {
                        ::std::result::Result::Ok(__arg) => { #invoke }
                        ::std::result::Result::Err(__e) => ::std::result::Result::Err(__e),
                    }
                },
            )
        }
        _ => (
            quote!(::std::option::Option::None),
            quote! {
                let __result: ::routekit::HandlerResult = ::std::result::Result::Err(
                    ::routekit::HandlerError::UnsupportedArity(#name),
                );
                __result
            },
        ),
    };

    let annotations = attrs.to_tokens();
    Ok(quote! {
        ::routekit::model::MethodSpec {
            method: ::routekit::model::MethodRef {
                name: #name,
                arity: #arity,
                input: #input,
                invoker: ::routekit::invoker(|__instance, __input| {
                    ::std::boxed::Box::pin(async move {
                        match ::routekit::__private::Arc::downcast::<Self>(__instance) {
                            ::std::result::Result::Ok(__this) => { #body }
                            ::std::result::Result::Err(_) => ::std::result::Result::Err(
                                ::routekit::HandlerError::InstanceMismatch(
                                    ::std::any::type_name::<Self>(),
                                ),
                            ),
                        }
                    })
                }),
            },
            annotations: #annotations,
        }
    })
}

pub fn expand(config: ControllerConfig, mut item: ItemImpl) -> syn::Result<TokenStream> {
    if let Some((_, path, _)) = &item.trait_ {
        return Err(syn::Error::new_spanned(
            path,
            "#[controller] goes on an inherent impl block, not a trait impl",
        ));
    }
    if !item.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &item.generics,
            "generic controllers are not supported",
        ));
    }

    let mut specs = Vec::new();
    for impl_item in item.items.iter_mut() {
        if let ImplItem::Fn(method) = impl_item {
            let attrs = take_route_attrs(&mut method.attrs)?;
            if attrs.is_route() {
                specs.push(method_spec(&method.sig, &attrs)?);
            }
        }
    }

    let self_ty = &item.self_ty;

    let sub_router = match &config.sub_router {
        None => quote!(),
        Some(prefix) => {
            let descriptor = match prefix {
                Some(p) => quote!(::routekit::model::SubRouterDescriptor::new(#p)),
                None => quote!(::routekit::model::SubRouterDescriptor::by_convention()),
            };
            quote! {
                fn sub_router() -> ::std::option::Option<::routekit::model::SubRouterDescriptor> {
                    ::std::option::Option::Some(#descriptor)
                }
            }
        }
    };

    let create = if config.provided {
        quote!()
    } else {
        let value = match &config.ctor {
            Some(expr) => quote!(#expr),
            None => quote!(<Self as ::std::default::Default>::default()),
        };
        quote! {
            fn create() -> ::std::option::Option<::routekit::Instance> {
                let __value: Self = #value;
                let __instance: ::routekit::Instance = ::routekit::__private::Arc::new(__value);
                ::std::option::Option::Some(__instance)
            }
        }
    };

    let registration = if config.scan {
        quote! {
            ::routekit::inventory::submit! {
                ::routekit::ControllerRegistration(::routekit::ControllerRef::of::<#self_ty>)
            }
        }
    } else {
        quote!()
    };

    Ok(quote! {
        #item

        impl ::routekit::Controller for #self_ty {
            #sub_router

            fn describe_routes() -> ::std::vec::Vec<::routekit::model::MethodSpec> {
                ::std::vec![#(#specs),*]
            }

            #create
        }

        #registration
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tokens: TokenStream) -> syn::Result<ControllerConfig> {
        syn::parse2(tokens)
    }

    #[test]
    fn parses_options() {
        let c = config(quote!(sub_router = "/api", scan = false)).unwrap();
        assert_eq!(c.sub_router, Some(Some("/api".to_string())));
        assert!(!c.scan);

        let c = config(quote!(sub_router, provided)).unwrap();
        assert_eq!(c.sub_router, Some(None));
        assert!(c.provided);

        let c = config(quote!()).unwrap();
        assert!(c.sub_router.is_none() && c.scan);
    }

    #[test]
    fn suggests_close_option_names() {
        let err = config(quote!(sub_routr)).err().unwrap();
        assert!(err.to_string().contains("did you mean `sub_router`"));
    }

    #[test]
    fn provided_conflicts_with_ctor() {
        assert!(config(quote!(provided, ctor = Foo::new())).is_err());
    }

    #[test]
    fn rejects_trait_impls_and_bad_receivers() {
        let c = config(quote!()).unwrap();
        let item: ItemImpl = syn::parse_quote! {
            impl Clone for Foo { fn clone(&self) -> Self { Foo } }
        };
        assert!(expand(c, item).is_err());

        let c = config(quote!()).unwrap();
        let item: ItemImpl = syn::parse_quote! {
            impl Foo {
                #[get]
                fn list(&mut self) {}
            }
        };
        assert!(expand(c, item).is_err());
    }

    #[test]
    fn route_attributes_are_stripped_from_output() {
        let c = config(quote!(sub_router)).unwrap();
        let item: ItemImpl = syn::parse_quote! {
            impl Foo {
                #[get("/x")]
                async fn x(&self) -> &'static str { "x" }
                fn helper(&self) {}
            }
        };
        let out = expand(c, item).unwrap().to_string();
        assert!(!out.contains("# [get"));
        assert!(out.contains("VerbAnnotation :: new"));
        assert!(out.contains("inventory :: submit"));
    }
}
