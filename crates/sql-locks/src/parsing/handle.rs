//! Parser handle with a one-time, shared initialization
//!
//! Building the grammar engine happens once per handle. The first caller
//! runs the loader while concurrent callers wait on a condvar, and every
//! caller observes the same outcome. A failed load is never retried.

use super::{ParsedStatement, shim, utility, with_list};
use crate::config::AnalyzerConfig;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, TokenWithSpan, Tokenizer};
use std::sync::{Arc, LazyLock};

/// Statement parsed once at load time to prove the grammar works
const SELF_TEST_SQL: &str = "SELECT 1";

/// Process-wide handle with the default configuration
static GLOBAL: LazyLock<ParserHandle> =
    LazyLock::new(|| ParserHandle::new(AnalyzerConfig::default()));

/// A loaded grammar: dialect plus parser limits
#[derive(Debug)]
pub struct GrammarEngine {
    dialect: Box<dyn Dialect + Send + Sync>,
    recursion_limit: usize,
}

impl GrammarEngine {
    /// Build the engine for `config` and parse a trivial statement with it
    pub fn load(config: &AnalyzerConfig) -> Result<Self> {
        let engine = Self {
            dialect: config.dialect.dialect(),
            recursion_limit: config.recursion_limit,
        };
        engine
            .parse(SELF_TEST_SQL)
            .map_err(|e| Error::ParserUnavailable(e.to_string()))?;
        Ok(engine)
    }

    /// Parse every statement in `sql`.
    ///
    /// Fails with [`Error::EmptyInput`] when the text holds nothing but
    /// whitespace, comments and semicolons.
    pub fn parse(&self, sql: &str) -> Result<Vec<ParsedStatement>> {
        let tokens = Tokenizer::new(self.dialect.as_ref(), sql).tokenize_with_location()?;

        let mut statements = Vec::new();
        for chunk in split_statements(tokens) {
            statements.extend(self.parse_chunk(chunk)?);
        }

        if statements.is_empty() {
            return Err(Error::EmptyInput);
        }
        Ok(statements)
    }

    fn parse_chunk(&self, tokens: Vec<TokenWithSpan>) -> Result<Vec<ParsedStatement>> {
        if let Some(statement) = utility::recognize(&tokens)? {
            return Ok(vec![ParsedStatement::Utility(statement)]);
        }

        let rewritten = shim::rewrite(tokens);
        if rewritten.changed {
            tracing::debug!("Rewrote statement tokens before parsing");
        }

        let retry = with_list::holds_delete(&rewritten.tokens).then(|| rewritten.tokens.clone());
        let statements = match self.parser(rewritten.tokens).parse_statements() {
            Ok(statements) => statements,
            Err(error) => {
                let Some(tokens) = retry else {
                    return Err(error.into());
                };
                // Report the grammar's own error if the retry fails too
                let (with, statement) =
                    with_list::parse(&mut self.parser(tokens)).map_err(|_| error)?;
                tracing::debug!("Parsed WITH list holding DELETE one query at a time");
                return Ok(vec![ParsedStatement::Sql {
                    statement: Box::new(statement),
                    lock_strengths: rewritten.lock_strengths,
                    with,
                }]);
            }
        };

        Ok(statements
            .into_iter()
            .map(|statement| ParsedStatement::Sql {
                statement: Box::new(statement),
                lock_strengths: rewritten.lock_strengths.clone(),
                with: Vec::new(),
            })
            .collect())
    }

    fn parser(&self, tokens: Vec<TokenWithSpan>) -> Parser<'_> {
        Parser::new(self.dialect.as_ref())
            .with_recursion_limit(self.recursion_limit)
            .with_tokens_with_locations(tokens)
    }
}

/// Split after each semicolon, dropping pieces with nothing but whitespace,
/// comments and the terminator.
///
/// Each piece keeps its own semicolon: `COPY ... FROM STDIN` requires one.
fn split_statements(tokens: Vec<TokenWithSpan>) -> Vec<Vec<TokenWithSpan>> {
    let mut chunks = vec![Vec::new()];
    for token in tokens {
        let terminator = token.token == Token::SemiColon;
        if let Some(chunk) = chunks.last_mut() {
            chunk.push(token);
        }
        if terminator {
            chunks.push(Vec::new());
        }
    }
    chunks.retain(|chunk| {
        chunk
            .iter()
            .any(|t| !matches!(t.token, Token::Whitespace(_) | Token::SemiColon | Token::EOF))
    });
    chunks
}

/// Observable lifecycle of a [`ParserHandle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStatus {
    NotStarted,
    Initializing,
    Ready,
    Failed(String),
}

enum InitState {
    NotStarted,
    Initializing,
    Ready(Arc<GrammarEngine>),
    Failed(String),
}

type Loader = Box<dyn Fn(&AnalyzerConfig) -> Result<GrammarEngine> + Send + Sync>;

/// Lazily initialized grammar engine shared by every analysis that uses it
pub struct ParserHandle {
    config: AnalyzerConfig,
    loader: Loader,
    state: Mutex<InitState>,
    ready: Condvar,
}

impl ParserHandle {
    /// Create a handle that loads the grammar for `config` on first use
    pub fn new(config: AnalyzerConfig) -> Self {
        Self::with_loader(config, GrammarEngine::load)
    }

    /// Create a handle with a custom loader
    pub fn with_loader<F>(config: AnalyzerConfig, loader: F) -> Self
    where
        F: Fn(&AnalyzerConfig) -> Result<GrammarEngine> + Send + Sync + 'static,
    {
        Self {
            config,
            loader: Box::new(loader),
            state: Mutex::new(InitState::NotStarted),
            ready: Condvar::new(),
        }
    }

    /// The process-wide handle with the default configuration
    pub fn global() -> &'static ParserHandle {
        &GLOBAL
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn status(&self) -> InitStatus {
        match &*self.state.lock() {
            InitState::NotStarted => InitStatus::NotStarted,
            InitState::Initializing => InitStatus::Initializing,
            InitState::Ready(_) => InitStatus::Ready,
            InitState::Failed(message) => InitStatus::Failed(message.clone()),
        }
    }

    /// Get the grammar engine, loading it if this is the first call.
    ///
    /// Callers arriving while another thread is loading block until that
    /// load finishes and share its result.
    pub fn engine(&self) -> Result<Arc<GrammarEngine>> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                InitState::Ready(engine) => return Ok(engine.clone()),
                InitState::Failed(message) => {
                    return Err(Error::ParserUnavailable(message.clone()));
                }
                InitState::NotStarted => break,
                InitState::Initializing => {}
            }
            self.ready.wait(&mut state);
        }
        *state = InitState::Initializing;
        drop(state);

        let mut guard = LoadGuard {
            handle: self,
            armed: true,
        };
        let (next, result) = match (self.loader)(&self.config) {
            Ok(engine) => {
                let engine = Arc::new(engine);
                (InitState::Ready(engine.clone()), Ok(engine))
            }
            Err(e) => {
                let message = match e {
                    Error::ParserUnavailable(message) => message,
                    other => other.to_string(),
                };
                tracing::warn!("SQL grammar failed to initialize: {}", message);
                (
                    InitState::Failed(message.clone()),
                    Err(Error::ParserUnavailable(message)),
                )
            }
        };

        guard.armed = false;
        *self.state.lock() = next;
        self.ready.notify_all();
        result
    }

    /// Parse `sql` with this handle's engine
    pub fn parse(&self, sql: &str) -> Result<Vec<ParsedStatement>> {
        self.engine()?.parse(sql)
    }
}

/// Marks the handle failed if the loader unwinds, so waiters wake up
struct LoadGuard<'a> {
    handle: &'a ParserHandle,
    armed: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("SQL grammar loader panicked");
            *self.handle.state.lock() = InitState::Failed("grammar loader panicked".into());
            self.handle.ready.notify_all();
        }
    }
}

impl std::fmt::Debug for ParserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserHandle")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}
