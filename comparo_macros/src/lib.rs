use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, quote};
use syn::{
    Expr, LitStr, Token,
    parse::{Parse, ParseStream},
    parse_macro_input,
    punctuated::Punctuated,
};

extern crate proc_macro;

struct Entry {
    label: Option<LitStr>,
    body: Expr,
}

impl Parse for Entry {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let label = if input.peek(LitStr) && input.peek2(Token![=>]) {
            let label = input.parse()?;
            input.parse::<Token![=>]>()?;
            Some(label)
        } else {
            None
        };
        Ok(Entry {
            label,
            body: input.parse()?,
        })
    }
}

/// Builds a `Vec<comparo::Operation>` from `;`-separated expressions.
///
/// Each expression becomes the body of one operation. Unless an explicit
/// `"label" =>` is given, the label is the expression's own source text.
///
/// ```ignore
/// let ops = operations! {
///     double_loop(&data);
///     "vectorized" => double_vectorized(&data);
/// };
/// // labels: "double_loop(&data)", "vectorized"
/// ```
#[proc_macro]
pub fn operations(input: TokenStream) -> TokenStream {
    let entries =
        parse_macro_input!(input with Punctuated::<Entry, Token![;]>::parse_terminated);
    TokenStream::from(expand(&entries))
}

fn expand(entries: &Punctuated<Entry, Token![;]>) -> TokenStream2 {
    let ops = entries.iter().map(|entry| {
        let body = &entry.body;
        let label = match &entry.label {
            Some(label) => label.value(),
            None => source_label(&body.to_token_stream().to_string()),
        };
        quote! {
            ::comparo::Operation::new(#label, || { #body })
        }
    });

    quote! {
        ::std::vec![#(#ops),*]
    }
}

/// Undo the spacing `TokenStream::to_string` puts between tokens. A space
/// survives only between two word characters, as in `x as u64`. String
/// literals are copied as written.
fn source_label(tokens: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_' || c == '"' || c == '\'';
    let mut out = String::with_capacity(tokens.len());
    let mut pending_space = false;
    let mut in_string = false;
    let mut escaped = false;
    for c in tokens.chars() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && out.chars().next_back().is_some_and(is_word) && is_word(c) {
            out.push(' ');
        }
        pending_space = false;
        in_string = c == '"' && !out.ends_with('\'');
        out.push(c);
    }
    out
}
