// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Proc macros for courier.
//!
//! Provides the `#[remote_interface]` attribute macro that turns an async
//! trait into a remotely callable interface.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    FnArg, Ident, ItemTrait, LitStr, Pat, ReturnType, TraitItem, TraitItemFn, Type,
    parse_macro_input, spanned::Spanned,
};

/// Generates a client and a service adapter for a remote interface.
///
/// Place it above `#[async_trait]`. Every method must be `async`, take
/// `&self` and an `&InvocationContext` first, and return
/// `Result<T, RemoteError>`. Arguments and return values must be
/// serde-serializable owned types.
///
/// For a trait `Greeter` the macro emits:
/// - `GreeterClient`: one method per trait method, minus the context,
///   returning `Result<T, CoreError>`. Calls travel over the call queue.
/// - `GreeterService<T>`: wraps an `Arc<T: Greeter>` and implements
///   `RemoteService` so it can be registered with a `ServiceRegistry`.
///
/// Method options, given as `#[remote(...)]`:
/// - `fire_and_forget`: the client returns once the call is enqueued. The
///   method must return `Result<(), RemoteError>`.
/// - `immediate_failure = "ErrorType"`: errors of this type are never
///   retried. May be repeated.
///
/// # Example
///
/// ```ignore
/// use courier_core::{InvocationContext, RemoteError, async_trait, remote_interface};
///
/// #[remote_interface(name = "Greeter")]
/// #[async_trait]
/// pub trait Greeter: Send + Sync {
///     async fn greet(&self, ctx: &InvocationContext, name: String) -> Result<String, RemoteError>;
///
///     #[remote(fire_and_forget)]
///     async fn wave(&self, ctx: &InvocationContext, at: String) -> Result<(), RemoteError>;
/// }
///
/// let reply = GreeterClient::new(proxy).greet("world".into()).await?;
/// ```
#[proc_macro_attribute]
pub fn remote_interface(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut interface_name: Option<LitStr> = None;
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("name") {
            interface_name = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported remote_interface property, expected `name`"))
        }
    });
    parse_macro_input!(attr with parser);

    let input = parse_macro_input!(item as ItemTrait);

    match generate_remote_interface(input, interface_name) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct RemoteMethod {
    ident: Ident,
    args: Vec<(Ident, Type)>,
    ok_type: Type,
    fire_and_forget: bool,
    immediate_failures: Vec<LitStr>,
}

fn generate_remote_interface(
    mut input: ItemTrait,
    interface_name: Option<LitStr>,
) -> syn::Result<TokenStream2> {
    let trait_ident = input.ident.clone();
    let vis = input.vis.clone();
    let interface_name = interface_name
        .map(|lit| lit.value())
        .unwrap_or_else(|| trait_ident.to_string());

    let mut methods = Vec::new();
    for item in input.items.iter_mut() {
        if let TraitItem::Fn(method) = item {
            methods.push(parse_method(method)?);
        }
    }

    let client_ident = format_ident!("{}Client", trait_ident);
    let service_ident = format_ident!("{}Service", trait_ident);

    let client_methods = methods.iter().map(|m| client_method(m, &interface_name));
    let descriptors = methods.iter().map(|m| {
        let name = m.ident.to_string();
        let fire_and_forget = m.fire_and_forget;
        let immediate = &m.immediate_failures;
        quote! {
            ::courier_core::MethodDescriptor {
                name: #name,
                fire_and_forget: #fire_and_forget,
                immediate_failures: &[#(#immediate),*],
            }
        }
    });
    let dispatch_arms = methods.iter().map(dispatch_arm);

    let client_doc = format!("Queue-backed client for the `{}` remote interface.", interface_name);
    let service_doc = format!(
        "Adapts a `{}` implementation for registration with a `ServiceRegistry`.",
        trait_ident
    );

    Ok(quote! {
        #input

        #[doc = #client_doc]
        #[derive(Clone)]
        #vis struct #client_ident {
            proxy: ::courier_core::ClientProxy,
        }

        impl #client_ident {
            /// Interface name carried in every call.
            pub const INTERFACE: &'static str = #interface_name;

            pub fn new(proxy: ::courier_core::ClientProxy) -> Self {
                Self { proxy }
            }

            /// Same client, but its calls are tagged for recent-activity monitoring.
            pub fn tagged(&self) -> Self {
                Self { proxy: self.proxy.tagged() }
            }

            #(#client_methods)*
        }

        #[doc = #service_doc]
        #vis struct #service_ident<T: ?Sized> {
            inner: ::std::sync::Arc<T>,
        }

        impl<T: #trait_ident + ?Sized + Send + Sync + 'static> #service_ident<T> {
            pub const METHODS: &'static [::courier_core::MethodDescriptor] = &[#(#descriptors),*];

            pub fn new(inner: ::std::sync::Arc<T>) -> Self {
                Self { inner }
            }
        }

        #[::courier_core::async_trait]
        impl<T: #trait_ident + ?Sized + Send + Sync + 'static> ::courier_core::RemoteService
            for #service_ident<T>
        {
            fn interface_name(&self) -> &str {
                #interface_name
            }

            fn methods(&self) -> &[::courier_core::MethodDescriptor] {
                Self::METHODS
            }

            async fn invoke(
                &self,
                __ctx: &::courier_core::InvocationContext,
                __method: &str,
                __params: ::std::vec::Vec<::courier_core::serde_json::Value>,
            ) -> ::std::result::Result<::courier_core::serde_json::Value, ::courier_core::RemoteError>
            {
                #[allow(unused_mut, unused_variables)]
                let mut __args = __params.into_iter();
                match __method {
                    #(#dispatch_arms)*
                    other => ::std::result::Result::Err(::courier_core::RemoteError::configuration(
                        ::std::format!("method '{}' is not part of interface '{}'", other, #interface_name),
                    )),
                }
            }
        }
    })
}

fn parse_method(method: &mut TraitItemFn) -> syn::Result<RemoteMethod> {
    let sig = &method.sig;
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(
            sig.fn_token.span,
            "#[remote_interface] methods must be async",
        ));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver)) if receiver.reference.is_some() => {}
        _ => {
            return Err(syn::Error::new(
                sig.inputs.span(),
                "#[remote_interface] methods must take `&self`",
            ));
        }
    }
    match inputs.next() {
        Some(FnArg::Typed(_)) => {}
        _ => {
            return Err(syn::Error::new(
                sig.inputs.span(),
                "#[remote_interface] methods must take an `&InvocationContext` after `&self`",
            ));
        }
    }

    let mut args = Vec::new();
    for arg in inputs {
        let FnArg::Typed(pat_type) = arg else {
            return Err(syn::Error::new(arg.span(), "unexpected receiver"));
        };
        let Pat::Ident(pat_ident) = pat_type.pat.as_ref() else {
            return Err(syn::Error::new(
                pat_type.pat.span(),
                "#[remote_interface] arguments must be simple identifiers",
            ));
        };
        args.push((pat_ident.ident.clone(), (*pat_type.ty).clone()));
    }

    let ok_type = extract_result_ok_type(&sig.output)?;
    let output_span = sig.output.span();
    let ident = sig.ident.clone();

    let mut fire_and_forget = false;
    let mut immediate_failures = Vec::new();
    let mut kept = Vec::with_capacity(method.attrs.len());
    for attr in method.attrs.drain(..) {
        if !attr.path().is_ident("remote") {
            kept.push(attr);
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("fire_and_forget") {
                fire_and_forget = true;
                Ok(())
            } else if meta.path.is_ident("immediate_failure") {
                immediate_failures.push(meta.value()?.parse::<LitStr>()?);
                Ok(())
            } else {
                Err(meta.error(
                    "unsupported remote property, expected `fire_and_forget` or `immediate_failure`",
                ))
            }
        })?;
    }
    method.attrs = kept;

    if fire_and_forget && !is_unit(&ok_type) {
        return Err(syn::Error::new(
            output_span,
            "#[remote(fire_and_forget)] methods must return `Result<(), RemoteError>`",
        ));
    }

    Ok(RemoteMethod {
        ident,
        args,
        ok_type,
        fire_and_forget,
        immediate_failures,
    })
}

fn client_method(method: &RemoteMethod, interface_name: &str) -> TokenStream2 {
    let ident = &method.ident;
    let method_name = ident.to_string();
    let arg_idents: Vec<_> = method.args.iter().map(|(ident, _)| ident).collect();
    let arg_types: Vec<_> = method.args.iter().map(|(_, ty)| ty).collect();
    let type_names: Vec<_> = arg_types
        .iter()
        .map(|ty| quote!(#ty).to_string().replace(' ', ""))
        .collect();
    let ok_type = &method.ok_type;

    let build_call = quote! {
        let __call = self
            .proxy
            .new_call(#interface_name, #method_name)
            #(.with_parameter(#type_names, ::courier_core::serde_json::to_value(&#arg_idents)?))*;
    };

    if method.fire_and_forget {
        quote! {
            pub async fn #ident(
                &self,
                #(#arg_idents: #arg_types),*
            ) -> ::std::result::Result<(), ::courier_core::CoreError> {
                #build_call
                self.proxy.invoke_fire_and_forget(__call).await
            }
        }
    } else {
        quote! {
            pub async fn #ident(
                &self,
                #(#arg_idents: #arg_types),*
            ) -> ::std::result::Result<#ok_type, ::courier_core::CoreError> {
                #build_call
                self.proxy.invoke::<#ok_type>(__call).await
            }
        }
    }
}

fn dispatch_arm(method: &RemoteMethod) -> TokenStream2 {
    let ident = &method.ident;
    let method_name = ident.to_string();
    let decode = method.args.iter().enumerate().map(|(index, (arg, ty))| {
        quote! {
            let #arg: #ty = ::courier_core::registry::decode_argument(&mut __args, #method_name, #index)?;
        }
    });
    let arg_idents = method.args.iter().map(|(ident, _)| ident);

    quote! {
        #method_name => {
            #(#decode)*
            let __result = self.inner.#ident(__ctx, #(#arg_idents),*).await?;
            ::courier_core::registry::encode_return(&__result)
        }
    }
}

fn is_unit(ty: &Type) -> bool {
    match ty {
        Type::Tuple(tuple) => tuple.elems.is_empty(),
        Type::Paren(paren) => is_unit(&paren.elem),
        _ => false,
    }
}

fn extract_result_ok_type(return_type: &ReturnType) -> syn::Result<Type> {
    let ReturnType::Type(_, ty) = return_type else {
        return Err(syn::Error::new(
            return_type.span(),
            "#[remote_interface] methods must return Result<T, RemoteError>",
        ));
    };

    let Type::Path(type_path) = ty.as_ref() else {
        return Err(syn::Error::new(
            ty.span(),
            "#[remote_interface] methods must return Result<T, RemoteError>",
        ));
    };

    let segment = type_path.path.segments.last().ok_or_else(|| {
        syn::Error::new(
            ty.span(),
            "#[remote_interface] methods must return Result<T, RemoteError>",
        )
    })?;

    if segment.ident != "Result" {
        return Err(syn::Error::new(
            segment.ident.span(),
            "#[remote_interface] methods must return Result<T, RemoteError>",
        ));
    }

    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return Err(syn::Error::new(
            segment.span(),
            "#[remote_interface] requires Result<T, RemoteError> with explicit type parameters",
        ));
    };

    match args.args.first() {
        Some(syn::GenericArgument::Type(t)) => Ok(t.clone()),
        _ => Err(syn::Error::new(
            args.span(),
            "#[remote_interface] requires Result<T, RemoteError> with explicit type parameters",
        )),
    }
}
