//! Conversation table and selection.
//!
//! Every conversation is evaluated against the request in table order.
//! Break rules short-circuit the scan; everything else that fully matches
//! becomes a candidate, and the [`Scoreboard`] decides among candidates.

use crate::config::{BreakOn, HttpConversation};
use crate::error::{ConfigError, MatchError};
use crate::matcher::{InboundRequest, RequestMatchers};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{debug, trace};

/// A conversation with its criteria compiled.
#[derive(Debug, Clone)]
pub struct CompiledConversation {
    pub spec: HttpConversation,
    pub matchers: RequestMatchers,
}

impl CompiledConversation {
    pub fn compile(spec: HttpConversation) -> Result<Self, ConfigError> {
        spec.validate()?;
        let matchers = RequestMatchers::compile(&spec.request)?;
        Ok(Self { spec, matchers })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Per-request accumulated weights, keyed by conversation name.
///
/// Entries keep their insertion order, which follows table order, so equal
/// scores rank the earlier conversation first.
#[derive(Debug, Clone, Default)]
pub struct Scoreboard {
    scores: IndexMap<String, u32>,
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&mut self, name: &str, count: u32) {
        *self.scores.entry(name.to_string()).or_insert(0) += count;
    }

    pub fn inc(&mut self, name: &str) {
        self.bump(name, 1);
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.scores.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Names by descending score; ties keep insertion order.
    pub fn ranking(&self) -> Vec<(&str, u32)> {
        let mut ranked: Vec<(&str, u32)> = self
            .scores
            .iter()
            .map(|(name, score)| (name.as_str(), *score))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    /// Highest-ranked name that is among the candidates.
    pub fn tie_break<'a>(
        &self,
        candidates: &[&'a CompiledConversation],
    ) -> Result<&'a CompiledConversation, MatchError> {
        for (name, _) in self.ranking() {
            if let Some(found) = candidates.iter().find(|c| c.name() == name) {
                return Ok(*found);
            }
        }
        Err(MatchError::NoCandidate(candidates.len()))
    }
}

/// Outcome of scanning the table.
#[derive(Debug)]
pub enum Evaluation<'a> {
    /// A break rule fired; serve it as is.
    Break(&'a CompiledConversation),
    /// Fully matching conversations, in table order.
    Candidates(Vec<&'a CompiledConversation>),
}

/// Outcome of evaluating one conversation.
enum Step {
    Break,
    Continue { matched: bool },
}

/// The conversation that answers a request.
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    Breaker(&'a CompiledConversation),
    Scored(&'a CompiledConversation),
}

impl<'a> Selection<'a> {
    pub fn conversation(&self) -> &'a CompiledConversation {
        match self {
            Selection::Breaker(c) | Selection::Scored(c) => *c,
        }
    }
}

/// Ordered, read-only rule set of one service.
#[derive(Debug, Clone, Default)]
pub struct ConversationTable {
    conversations: Vec<CompiledConversation>,
}

impl ConversationTable {
    /// Sort by `match-order` (stable) and compile. Names must be unique.
    pub fn compile(mut specs: Vec<HttpConversation>) -> Result<Self, ConfigError> {
        specs.sort_by_key(|c| c.match_order);
        let mut seen = HashSet::new();
        let mut conversations = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateName(spec.name));
            }
            conversations.push(CompiledConversation::compile(spec)?);
        }
        Ok(Self { conversations })
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledConversation> {
        self.conversations.iter()
    }

    fn step(
        conversation: &CompiledConversation,
        request: &InboundRequest,
        scores: &mut Scoreboard,
    ) -> Step {
        let name = conversation.name();
        let mut all_match = true;
        for (criterion, outcome) in conversation.matchers.evaluate(request) {
            trace!(conversation = %name, %criterion, matched = outcome.matched, score = outcome.score, "criterion");
            all_match &= outcome.matched;
            if outcome.score > 0 {
                scores.bump(name, outcome.score);
            }
        }

        match conversation.spec.break_on {
            BreakOn::Match if all_match => Step::Break,
            BreakOn::NoMatch if !all_match => Step::Break,
            BreakOn::Match => Step::Continue { matched: false },
            _ => Step::Continue { matched: all_match },
        }
    }

    /// Scan the whole table, stopping at the first break rule that fires.
    pub fn evaluate<'a>(
        &'a self,
        request: &InboundRequest,
        scores: &mut Scoreboard,
    ) -> Evaluation<'a> {
        let mut candidates = Vec::new();
        for conversation in &self.conversations {
            match Self::step(conversation, request, scores) {
                Step::Break => return Evaluation::Break(conversation),
                Step::Continue { matched: true } => {
                    scores.bump(conversation.name(), 0);
                    candidates.push(conversation);
                }
                Step::Continue { matched: false } => {}
            }
        }
        Evaluation::Candidates(candidates)
    }

    /// Pick the conversation that answers `request`.
    pub fn select<'a>(
        &'a self,
        request: &InboundRequest,
        scores: &mut Scoreboard,
    ) -> Result<Selection<'a>, MatchError> {
        match self.evaluate(request, scores) {
            Evaluation::Break(conversation) => {
                debug!(conversation = %conversation.name(), "Breaking match");
                Ok(Selection::Breaker(conversation))
            }
            Evaluation::Candidates(candidates) if candidates.is_empty() => {
                Err(MatchError::NoMatch)
            }
            Evaluation::Candidates(candidates) => {
                debug!(scores = ?scores.ranking(), "Tie-break");
                scores.tie_break(&candidates).map(Selection::Scored)
            }
        }
    }
}
