// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Tokenizer for human-readable numbering templates such as
//! `INV{yyyyMMdd}{seq:rule}{6}`.

use crate::lock::KeyedLocks;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

/// A piece of a numbering template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal text.
    Text(String),
    /// `{6}`: the number, padded to a width.
    Param(usize),
    /// `{key:arg}`: a function applied by the formatter.
    Func { key: String, arg: String },
    /// `{yyyyMMdd}`: a date pattern.
    Date(String),
}

/// Splits `template` into tokens.
///
/// Whitespace is dropped. A `{` left open at the end of the template is
/// discarded and whatever followed it is kept as text.
pub fn parse_template(template: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut buf = String::new();
    for c in template.chars().filter(|c| !c.is_whitespace()) {
        match c {
            '{' => {
                if !buf.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut buf)));
                }
            }
            '}' => tokens.push(classify(&std::mem::take(&mut buf))),
            _ => buf.push(c),
        }
    }
    if !buf.is_empty() {
        tokens.push(Token::Text(buf));
    }
    tokens
}

fn classify(inner: &str) -> Token {
    if !inner.is_empty()
        && inner.bytes().all(|b| b.is_ascii_digit())
        && let Ok(width) = inner.parse()
    {
        return Token::Param(width);
    }
    match inner.split_once(':') {
        Some((key, arg)) => Token::Func {
            key: key.to_owned(),
            arg: arg.to_owned(),
        },
        None => Token::Date(inner.to_owned()),
    }
}

/// Tokenized templates cached per `(rule_id, template)`.
#[derive(Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<(String, String), Arc<[Token]>>>,
    locks: KeyedLocks,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tokens of `template`, parsing it at most once per rule id.
    pub fn tokens(&self, rule_id: &str, template: &str) -> Arc<[Token]> {
        let key = (rule_id.to_owned(), template.to_owned());
        if let Some(tokens) = self.entries.read().get(&key) {
            return Arc::clone(tokens);
        }

        let _guard = self.locks.lock(&format!("{rule_id}\u{0}{template}"));
        if let Some(tokens) = self.entries.read().get(&key) {
            return Arc::clone(tokens);
        }
        let tokens: Arc<[Token]> = parse_template(template).into();
        self.entries.write().insert(key, Arc::clone(&tokens));
        tokens
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
