//! Entry-point attributes for `pledge`.
//!
//! `#[pledge::main]` and `#[pledge::test]` turn an `async fn` into a plain function that
//! builds a [`Scheduler`], runs the body with `Scheduler::block_on` and shuts the pool down
//! with draining afterwards. The function may take one argument, which receives a handle
//! to that scheduler.
//!
//! Both accept `threads = N` and `policy = "inline" | "deferred"`.
//!
//! [`Scheduler`]: https://docs.rs/pledge/latest/pledge/struct.Scheduler.html

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::{quote, ToTokens};
use syn::{
  parenthesized,
  parse::{Parse, ParseStream},
  parse_macro_input,
  punctuated::Punctuated,
  Block, Expr, ExprLit, FnArg, Ident, Lit, MetaNameValue, Pat, ReturnType, Token,
  Type,
};

#[proc_macro_attribute]
pub fn main(args: TokenStream, function: TokenStream) -> TokenStream {
  expand(args, function, Kind::Main)
}

#[proc_macro_attribute]
pub fn test(args: TokenStream, function: TokenStream) -> TokenStream {
  expand(args, function, Kind::Test)
}

#[doc(hidden)]
#[proc_macro_attribute]
pub fn internal_test(args: TokenStream, function: TokenStream) -> TokenStream {
  expand(args, function, Kind::InternalTest)
}

fn expand(args: TokenStream, function: TokenStream, kind: Kind) -> TokenStream {
  let config = parse_macro_input!(args as Config);
  let caller = parse_macro_input!(function as CallerFn);

  Entry { kind, config, caller }.into_token_stream().into()
}

#[derive(Clone, Copy)]
enum Kind {
  Main,
  Test,
  InternalTest,
}

enum Policy {
  Inline,
  Deferred,
}

#[derive(Default)]
struct Config {
  threads: Option<usize>,
  policy: Option<Policy>,
}

impl Parse for Config {
  fn parse(input: ParseStream) -> syn::Result<Self> {
    let mut config = Config::default();
    let pairs = Punctuated::<MetaNameValue, Token![,]>::parse_terminated(input)?;

    for pair in pairs {
      let Expr::Lit(ExprLit { lit, .. }) = &pair.value else {
        return Err(syn::Error::new_spanned(&pair.value, "expected a literal"));
      };

      if pair.path.is_ident("threads") {
        let Lit::Int(threads) = lit else {
          return Err(syn::Error::new_spanned(lit, "`threads` takes an integer"));
        };
        config.threads = Some(threads.base10_parse()?);
      } else if pair.path.is_ident("policy") {
        let Lit::Str(policy) = lit else {
          return Err(syn::Error::new_spanned(lit, "`policy` takes a string"));
        };
        config.policy = Some(match policy.value().as_str() {
          "inline" => Policy::Inline,
          "deferred" => Policy::Deferred,
          _ => {
            return Err(syn::Error::new_spanned(
              policy,
              "expected \"inline\" or \"deferred\"",
            ))
          }
        });
      } else {
        return Err(syn::Error::new_spanned(
          &pair.path,
          "unknown option, expected `threads` or `policy`",
        ));
      }
    }

    Ok(config)
  }
}

struct CallerFn {
  return_type: ReturnType,
  arg: Option<(Pat, Type)>,
  ident: Ident,
  block: Block,
}

impl Parse for CallerFn {
  fn parse(input: ParseStream) -> syn::Result<Self> {
    input.parse::<Token![async]>()?;
    input.parse::<Token![fn]>()?;
    let ident = input.parse::<Ident>()?;

    let content;
    parenthesized!(content in input);

    let args = Punctuated::<FnArg, Token![,]>::parse_terminated(&content)?;
    if args.len() > 1 {
      return Err(syn::Error::new_spanned(
        &args,
        "expected at most one argument, the scheduler",
      ));
    }

    let arg = match args.into_iter().next() {
      None => None,
      Some(FnArg::Typed(typed)) => Some((*typed.pat, *typed.ty)),
      Some(receiver @ FnArg::Receiver(_)) => {
        return Err(syn::Error::new_spanned(receiver, "`self` is not allowed here"))
      }
    };

    let return_type = input.parse::<ReturnType>()?;
    let block = input.parse::<Block>()?;

    Ok(CallerFn { return_type, arg, ident, block })
  }
}

struct Entry {
  kind: Kind,
  config: Config,
  caller: CallerFn,
}

impl ToTokens for Entry {
  fn to_tokens(&self, tokens: &mut proc_macro2::TokenStream) {
    let CallerFn { return_type, arg, ident, block } = &self.caller;

    let krate = match self.kind {
      Kind::InternalTest => quote!(crate),
      Kind::Main | Kind::Test => quote!(::pledge),
    };
    let attribute = match self.kind {
      Kind::Main => quote!(),
      Kind::Test | Kind::InternalTest => quote!(#[test]),
    };

    let threads = self.config.threads.map(|threads| quote!(.threads(#threads)));
    let policy = self.config.policy.as_ref().map(|policy| match policy {
      Policy::Inline => quote!(.policy(#krate::ContinuationPolicy::Inline)),
      Policy::Deferred => quote!(.policy(#krate::ContinuationPolicy::Deferred)),
    });

    let scheduler = Ident::new("__pledge_scheduler", Span::mixed_site());
    let bind = arg.as_ref().map(|(pat, ty)| {
      quote! { let #pat: #ty = ::std::clone::Clone::clone(&#scheduler); }
    });

    tokens.extend(quote! {
      #attribute
      fn #ident() #return_type {
        let #scheduler = #krate::Scheduler::builder()
          #threads
          #policy
          .build()
          .expect("failed to start the scheduler");

        let output = #scheduler.block_on({
          #bind
          async move #block
        });

        #scheduler
          .shutdown(true)
          .expect("scheduler shut down from one of its own workers");
        output
      }
    });
  }
}
