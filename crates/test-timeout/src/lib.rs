use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runs an async test on a fresh multi-threaded Tokio runtime and fails it
/// if it has not finished within the given number of seconds.
///
/// ```ignore
/// #[test_timeout::tokio_timeout_test(10)]
/// async fn relays_lines() { /* ... */ }
/// ```
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_secs(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let body = quote! {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async move {
            tokio::time::timeout(timeout_duration, async move #block)
                .await
                .expect("test timed out");
        });
    };

    guarded(strip(attrs, is_tokio_test_attribute), vis, sig, secs, body).into()
}

/// Runs a synchronous test on a watchdog thread and fails it if it has not
/// finished within the given number of seconds.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_secs(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }

    let body = quote! { #block };

    guarded(strip(attrs, is_test_attribute), vis, sig, secs, body).into()
}

fn parse_secs(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(secs)
}

/// Wraps `body` so it runs on its own thread while the test thread waits on
/// the result with a deadline. Panics from the body are resumed unchanged.
fn guarded(
    attrs: Vec<Attribute>,
    vis: syn::Visibility,
    sig: syn::Signature,
    secs: u64,
    body: TokenStream2,
) -> TokenStream2 {
    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_secs(#secs);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    }
}

fn strip(attrs: Vec<Attribute>, drop: fn(&Attribute) -> bool) -> Vec<Attribute> {
    attrs.into_iter().filter(|attr| !drop(attr)).collect()
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}

fn is_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!((segments.next(), segments.next()), (Some(first), None) if first.ident == "test")
}
