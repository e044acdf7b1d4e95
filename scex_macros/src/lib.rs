use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, ItemFn, Token};

struct MemberArgs {
    owner: String,
    name: Option<String>,
}

impl Parse for MemberArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let pairs = Punctuated::<syn::MetaNameValue, Token![,]>::parse_terminated(input)?;
        let mut owner = None;
        let mut name = None;
        for pair in pairs {
            let key = pair.path.get_ident().map(|i| i.to_string()).unwrap_or_default();
            let syn::Expr::Lit(syn::ExprLit { lit: syn::Lit::Str(value), .. }) = &pair.value
            else {
                return Err(syn::Error::new_spanned(&pair.value, "expected a string literal"));
            };
            match key.as_str() {
                "owner" => owner = Some(value.value()),
                "name" => name = Some(value.value()),
                other => {
                    return Err(syn::Error::new_spanned(
                        &pair.path,
                        format!("unknown #[member] argument `{}`", other),
                    ));
                }
            }
        }
        let owner = owner.ok_or_else(|| {
            syn::Error::new(input.span(), "#[member] requires owner = \"TypeName\"")
        })?;
        Ok(MemberArgs { owner, name })
    }
}

/// Maps a Rust parameter/result type to the expression-level type name it
/// registers as.
fn type_name_of(ty: &syn::Type) -> Option<&'static str> {
    match ty {
        syn::Type::Path(tp) if tp.qself.is_none() => {
            let ident = tp.path.get_ident()?;
            match ident.to_string().as_str() {
                "i64" => Some("Int"),
                "f64" => Some("Double"),
                "bool" => Some("Boolean"),
                "char" => Some("Char"),
                "String" => Some("String"),
                "Value" => Some("Any"),
                _ => None,
            }
        }
        syn::Type::Tuple(t) if t.elems.is_empty() => Some("Unit"),
        _ => None,
    }
}

/// Registers a function as an expression-level member of a host type.
///
/// The first parameter is the receiver; the remaining parameters become the
/// member's parameter list. Supported types: `i64` (Int), `f64` (Double),
/// `bool` (Boolean), `char` (Char), `String`, `Value` (Any), and `()` as a
/// result (Unit). The generated shim converts values, checks arity, and
/// submits a `MemberMeta` through `inventory`; call
/// `TypeRegistry::install_registered` to pick the submissions up.
///
/// ```ignore
/// #[member(owner = "Person", name = "greet")]
/// fn greet(recv: Value, greeting: String) -> String { … }
/// ```
#[proc_macro_attribute]
pub fn member(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as MemberArgs);
    let func = parse_macro_input!(item as ItemFn);
    let sig = &func.sig;
    let ident = &sig.ident;

    let result_name = match &sig.output {
        syn::ReturnType::Type(_, ty) => match type_name_of(ty) {
            Some(n) => n,
            None => {
                return syn::Error::new_spanned(ty, "#[member] cannot map this return type")
                    .to_compile_error()
                    .into();
            }
        },
        syn::ReturnType::Default => "Unit",
    };

    // (ident, scex type name) per parameter; the first one is the receiver.
    let mut params: Vec<(syn::Ident, &'static str, syn::Type)> = Vec::new();
    for input in &sig.inputs {
        let syn::FnArg::Typed(pt) = input else {
            return syn::Error::new_spanned(input, "#[member] does not support `self` receivers")
                .to_compile_error()
                .into();
        };
        let syn::Pat::Ident(pat_ident) = &*pt.pat else {
            return syn::Error::new_spanned(&pt.pat, "#[member] requires named parameters")
                .to_compile_error()
                .into();
        };
        let Some(ty_name) = type_name_of(&pt.ty) else {
            return syn::Error::new_spanned(&pt.ty, "#[member] cannot map this parameter type")
                .to_compile_error()
                .into();
        };
        params.push((pat_ident.ident.clone(), ty_name, (*pt.ty).clone()));
    }
    if params.is_empty() {
        return syn::Error::new_spanned(
            &sig.inputs,
            "#[member] requires a receiver as the first parameter",
        )
        .to_compile_error()
        .into();
    }

    let owner = &args.owner;
    let member_name = args.name.unwrap_or_else(|| ident.to_string());
    let shim_ident = format_ident!("__scex_member_{}", ident);
    let arity = params.len() - 1;

    let (recv_ident, _, recv_ty) = &params[0];
    let arg_params = &params[1..];
    let arg_meta = arg_params.iter().map(|(name, ty_name, _)| {
        let name = name.to_string();
        quote! { (#name, #ty_name) }
    });
    let arg_converts = arg_params.iter().enumerate().map(|(i, (name, _, ty))| {
        quote! {
            let #name: #ty = ::core::convert::TryFrom::try_from(&args[#i])?;
        }
    });
    let call_args = arg_params.iter().map(|(name, _, _)| name);

    let output = quote! {
        #func

        #[allow(non_snake_case)]
        fn #shim_ident(
            recv: &::scex::Value,
            args: &[::scex::Value],
        ) -> ::core::result::Result<::scex::Value, ::scex::EvalError> {
            if args.len() != #arity {
                return Err(::scex::EvalError::ValuesLen { expected: #arity, got: args.len() });
            }
            let #recv_ident: #recv_ty = ::core::convert::TryFrom::try_from(recv)?;
            #( #arg_converts )*
            let out = #ident(#recv_ident, #( #call_args ),*);
            Ok(::scex::Value::from(out))
        }

        ::scex::inventory::submit! {
            ::scex::MemberMeta {
                owner: #owner,
                name: #member_name,
                params: &[ #( #arg_meta ),* ],
                result: #result_name,
                invoke: #shim_ident,
            }
        }
    };

    output.into()
}
