pub mod chart;
pub mod intified;
pub mod rule;

use std::io::{self, Write};
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use fxhash::{FxHashMap, FxHashSet};
use multimap::MultiMap;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use intified::SymbolTable;
use rule::{Rule, Symbol, WeightedRule};

/// Tolerance used when checking that the rules of a non-terminal form a distribution.
pub const NORMALISATION_TOLERANCE: f64 = 1e-9;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NonterminalId(pub u32);

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TerminalId(pub u32);

impl NonterminalId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl TerminalId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RuleId {
    Unary(u32),
    Binary(u32),
}

/// `lhs -> terminal`
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct UnaryRule {
    pub lhs: NonterminalId,
    pub terminal: TerminalId,
}

/// `lhs -> left right`
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct BinaryRule {
    pub lhs: NonterminalId,
    pub left: NonterminalId,
    pub right: NonterminalId,
}

/// Rule probabilities, indexed by `RuleId`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ProbabilityTable {
    pub unary: Vec<f64>,
    pub binary: Vec<f64>,
}

impl ProbabilityTable {
    pub fn zeroed(num_unary: usize, num_binary: usize) -> Self {
        Self {
            unary: vec![0.0; num_unary],
            binary: vec![0.0; num_binary],
        }
    }
}

impl Index<RuleId> for ProbabilityTable {
    type Output = f64;

    fn index(&self, rule: RuleId) -> &Self::Output {
        match rule {
            RuleId::Unary(i) => &self.unary[i as usize],
            RuleId::Binary(i) => &self.binary[i as usize],
        }
    }
}

impl IndexMut<RuleId> for ProbabilityTable {
    fn index_mut(&mut self, rule: RuleId) -> &mut Self::Output {
        match rule {
            RuleId::Unary(i) => &mut self.unary[i as usize],
            RuleId::Binary(i) => &mut self.binary[i as usize],
        }
    }
}

#[derive(Debug, Clone)]
/// A grammar in Chomsky normal form together with its rule probabilities.
///
/// The rule inventory is fixed at construction. Only the probability
/// table changes afterwards, and it is always replaced as a whole.
pub struct GrammarModel {
    start: NonterminalId,
    nonterminals: SymbolTable<Symbol>,
    terminals: SymbolTable<Symbol>,
    flagged: FxHashSet<NonterminalId>,
    unary: Vec<UnaryRule>,
    binary: Vec<BinaryRule>,
    unary_index: FxHashMap<UnaryRule, u32>,
    binary_index: FxHashMap<BinaryRule, u32>,
    // Rules grouped by the non-terminal on their LHS, unary rules first.
    rules_by_lhs: MultiMap<NonterminalId, RuleId>,
    // Unary rules which we search by terminal on the RHS.
    unary_by_terminal: MultiMap<TerminalId, u32>,
    probabilities: ProbabilityTable,
}

impl GrammarModel {
    /// Builds the rule inventory. All probabilities start out as 0.
    pub fn new<I>(start: &str, rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = Rule<Symbol, Symbol>>,
    {
        let mut nonterminals = SymbolTable::new();
        let mut terminals = SymbolTable::new();
        let start = NonterminalId(nonterminals.intify(Symbol::from(start)));

        let mut unary = vec![];
        let mut binary = vec![];
        let mut unary_index = FxHashMap::default();
        let mut binary_index = FxHashMap::default();

        for rule in rules {
            match rule {
                Rule::Lexical { lhs, rhs } => {
                    let rule = UnaryRule {
                        lhs: NonterminalId(nonterminals.intify(lhs)),
                        terminal: TerminalId(terminals.intify(rhs)),
                    };
                    if unary_index.contains_key(&rule) {
                        warn!(?rule, "ignoring duplicate unary rule");
                        continue;
                    }
                    unary_index.insert(rule, unary.len() as u32);
                    unary.push(rule);
                }
                Rule::NonLexical { lhs, rhs } => {
                    let (left, right) = match <[Symbol; 2]>::try_from(rhs) {
                        Ok([left, right]) => (left, right),
                        Err(rhs) => {
                            return Err(Error::MalformedRule {
                                lhs: lhs.to_string(),
                                found: rhs.len(),
                            })
                        }
                    };
                    let rule = BinaryRule {
                        lhs: NonterminalId(nonterminals.intify(lhs)),
                        left: NonterminalId(nonterminals.intify(left)),
                        right: NonterminalId(nonterminals.intify(right)),
                    };
                    if binary_index.contains_key(&rule) {
                        warn!(?rule, "ignoring duplicate binary rule");
                        continue;
                    }
                    binary_index.insert(rule, binary.len() as u32);
                    binary.push(rule);
                }
            }
        }

        let mut rules_by_lhs = MultiMap::new();
        for (i, rule) in unary.iter().enumerate() {
            rules_by_lhs.insert(rule.lhs, RuleId::Unary(i as u32));
        }
        for (i, rule) in binary.iter().enumerate() {
            rules_by_lhs.insert(rule.lhs, RuleId::Binary(i as u32));
        }

        let mut unary_by_terminal = MultiMap::new();
        for (i, rule) in unary.iter().enumerate() {
            unary_by_terminal.insert(rule.terminal, i as u32);
        }

        debug!(
            nonterminals = nonterminals.len(),
            terminals = terminals.len(),
            unary = unary.len(),
            binary = binary.len(),
            "built grammar"
        );

        let probabilities = ProbabilityTable::zeroed(unary.len(), binary.len());

        Ok(Self {
            start,
            nonterminals,
            terminals,
            flagged: FxHashSet::default(),
            unary,
            binary,
            unary_index,
            binary_index,
            rules_by_lhs,
            unary_by_terminal,
            probabilities,
        })
    }

    /// Reads one rule per non-empty line, e.g. `S -> NP VP` or `N -> ball`.
    pub fn parse(start: &str, rules: &str) -> Result<Self> {
        let rules = rules
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(Rule::<Symbol, Symbol>::from_str)
            .collect::<Result<Vec<_>>>()?;
        Self::new(start, rules)
    }

    /// Reads one weighted rule per non-empty line, e.g. `S -> NP VP 0.5`,
    /// and uses the weights as the initial probabilities.
    pub fn parse_weighted(start: &str, rules: &str) -> Result<Self> {
        let weighted = parse_weighted_rules(rules)?;
        let mut grammar = Self::new(start, weighted.iter().map(|w| w.rule.clone()))?;
        grammar.set_probabilities(weighted)?;
        Ok(grammar)
    }

    /// Marks the given non-terminals as flagged for context-dependent scoring.
    pub fn with_flagged<I, S>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            let nt = self
                .nonterminal(name)
                .ok_or_else(|| Error::UnknownNonterminal(name.to_string()))?;
            self.flagged.insert(nt);
        }
        Ok(self)
    }

    pub fn start(&self) -> NonterminalId {
        self.start
    }

    pub fn num_nonterminals(&self) -> usize {
        self.nonterminals.len()
    }

    pub fn nonterminals(&self) -> impl Iterator<Item = NonterminalId> {
        (0..self.nonterminals.len() as u32).map(NonterminalId)
    }

    pub fn nonterminal(&self, name: &str) -> Option<NonterminalId> {
        self.nonterminals.index(name).map(NonterminalId)
    }

    pub fn terminal(&self, name: &str) -> Option<TerminalId> {
        self.terminals.index(name).map(TerminalId)
    }

    pub fn nonterminal_name(&self, nt: NonterminalId) -> &Symbol {
        self.nonterminals.symbol(nt.0)
    }

    pub fn terminal_name(&self, t: TerminalId) -> &Symbol {
        self.terminals.symbol(t.0)
    }

    pub fn is_flagged(&self, nt: NonterminalId) -> bool {
        self.flagged.contains(&nt)
    }

    pub fn unary_rules(&self) -> &[UnaryRule] {
        &self.unary
    }

    pub fn binary_rules(&self) -> &[BinaryRule] {
        &self.binary
    }

    /// Rules with `lhs` on their left-hand side, unary rules first.
    pub fn rules_of(&self, lhs: NonterminalId) -> &[RuleId] {
        self.rules_by_lhs
            .get_vec(&lhs)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Indices of the unary rules producing `terminal`.
    pub fn unary_rules_for(&self, terminal: TerminalId) -> &[u32] {
        self.unary_by_terminal
            .get_vec(&terminal)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Maps the tokens of a sentence to terminals. Unknown words become `None`.
    pub fn intify_sentence<T: AsRef<str>>(&self, tokens: &[T]) -> Vec<Option<TerminalId>> {
        tokens.iter().map(|t| self.terminal(t.as_ref())).collect()
    }

    pub fn rule_id(&self, rule: &Rule<Symbol, Symbol>) -> Option<RuleId> {
        match rule {
            Rule::Lexical { lhs, rhs } => {
                let rule = UnaryRule {
                    lhs: self.nonterminal(lhs)?,
                    terminal: self.terminal(rhs)?,
                };
                self.unary_index.get(&rule).copied().map(RuleId::Unary)
            }
            Rule::NonLexical { lhs, rhs } => match rhs.as_slice() {
                [left, right] => {
                    let rule = BinaryRule {
                        lhs: self.nonterminal(lhs)?,
                        left: self.nonterminal(left)?,
                        right: self.nonterminal(right)?,
                    };
                    self.binary_index.get(&rule).copied().map(RuleId::Binary)
                }
                _ => None,
            },
        }
    }

    pub fn lhs(&self, rule: RuleId) -> NonterminalId {
        match rule {
            RuleId::Unary(i) => self.unary[i as usize].lhs,
            RuleId::Binary(i) => self.binary[i as usize].lhs,
        }
    }

    /// The symbolic form of a rule.
    pub fn rule(&self, rule: RuleId) -> Rule<Symbol, Symbol> {
        match rule {
            RuleId::Unary(i) => {
                let r = self.unary[i as usize];
                Rule::Lexical {
                    lhs: self.nonterminal_name(r.lhs).clone(),
                    rhs: self.terminal_name(r.terminal).clone(),
                }
            }
            RuleId::Binary(i) => {
                let r = self.binary[i as usize];
                Rule::NonLexical {
                    lhs: self.nonterminal_name(r.lhs).clone(),
                    rhs: vec![
                        self.nonterminal_name(r.left).clone(),
                        self.nonterminal_name(r.right).clone(),
                    ],
                }
            }
        }
    }

    pub fn probabilities(&self) -> &ProbabilityTable {
        &self.probabilities
    }

    pub fn probability(&self, rule: RuleId) -> f64 {
        self.probabilities[rule]
    }

    /// Replaces the whole probability table.
    pub fn set_probability_table(&mut self, table: ProbabilityTable) {
        debug_assert_eq!(table.unary.len(), self.unary.len());
        debug_assert_eq!(table.binary.len(), self.binary.len());
        self.probabilities = table;
    }

    /// Replaces the probability table with the given weights.
    /// Rules that are not mentioned get probability 0.
    pub fn set_probabilities<I>(&mut self, weighted: I) -> Result<()>
    where
        I: IntoIterator<Item = WeightedRule<Symbol, Symbol, f64>>,
    {
        let mut table = ProbabilityTable::zeroed(self.unary.len(), self.binary.len());

        for WeightedRule { rule, weight } in weighted {
            if !(0.0..=1.0).contains(&weight) {
                return Err(Error::InvalidProbability {
                    rule: rule.to_string(),
                    probability: weight,
                });
            }
            let id = self
                .rule_id(&rule)
                .ok_or_else(|| Error::UnknownRule(rule.to_string()))?;
            table[id] = weight;
        }

        self.probabilities = table;
        Ok(())
    }

    /// Reads one weighted rule per non-empty line and installs the weights.
    pub fn parse_probabilities(&mut self, text: &str) -> Result<()> {
        let weighted = parse_weighted_rules(text)?;
        self.set_probabilities(weighted)
    }

    /// Gives every rule of a non-terminal a random share of the mass that is
    /// still unassigned. The last rule receives the exact remainder.
    pub fn randomise_probabilities<R: Rng>(&mut self, rng: &mut R) {
        let mut table = ProbabilityTable::zeroed(self.unary.len(), self.binary.len());

        for nt in self.nonterminals() {
            let rules = self.rules_of(nt);
            let mut assigned: f64 = 0.0;

            for (i, &rule) in rules.iter().enumerate() {
                let remaining = (1.0 - assigned).max(0.0);
                let p = if i + 1 == rules.len() {
                    remaining
                } else {
                    rng.gen::<f64>() * remaining
                };
                table[rule] = p;
                assigned += p;
            }
        }

        self.probabilities = table;
    }

    /// Checks that the rules of every non-terminal sum to 1, or to 0 if the
    /// non-terminal is unused.
    pub fn check_normalisation(&self) -> Result<()> {
        for nt in self.nonterminals() {
            let rules = self.rules_of(nt);
            if rules.is_empty() {
                continue;
            }

            let total: f64 = rules.iter().map(|&r| self.probabilities[r]).sum();
            if total.abs() > NORMALISATION_TOLERANCE
                && (total - 1.0).abs() > NORMALISATION_TOLERANCE
            {
                return Err(Error::NotNormalised {
                    lhs: self.nonterminal_name(nt).to_string(),
                    total,
                });
            }
        }

        Ok(())
    }

    /// Writes every rule with its current probability, one per line.
    pub fn write_rules<Wr: Write>(&self, buf: &mut Wr) -> io::Result<()> {
        for i in 0..self.binary.len() {
            let id = RuleId::Binary(i as u32);
            writeln!(buf, "{} {}", self.rule(id), self.probabilities[id])?;
        }

        for i in 0..self.unary.len() {
            let id = RuleId::Unary(i as u32);
            writeln!(buf, "{} {}", self.rule(id), self.probabilities[id])?;
        }

        Ok(())
    }
}

fn parse_weighted_rules(text: &str) -> Result<Vec<WeightedRule<Symbol, Symbol, f64>>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(WeightedRule::from_str)
        .collect()
}
