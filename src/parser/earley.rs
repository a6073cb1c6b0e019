//! Probabilistic Earley parsing over rules of arbitrary length.
//!
//! Each position holds one item per alternative, dot and start, carrying the
//! most probable derivation found for it. An item that improves is processed
//! again, so the improvement reaches everything built on top of it. Cycles of
//! chain rules multiply in probabilities of at most 1 and never improve an
//! item, which bounds the work.

use std::cmp::Reverse;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use float_ord::FloatOrd;
use fxhash::FxHashMap;
use multimap::MultiMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::grammar::intified::SymbolTable;
use crate::grammar::rule::{Rule, Symbol, WeightedRule};
use crate::grammar::{GrammarModel, RuleId};
use crate::tree::{NodeType, Tree};

#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub lhs: u32,
    pub rhs: Vec<u32>,
    pub probability: f64,
}

/// Alternatives of arbitrary length plus a lexicon of
/// `(category, word, probability)` entries.
#[derive(Debug, Clone)]
pub struct EarleyGrammar {
    start: u32,
    nonterminals: SymbolTable<Symbol>,
    terminals: SymbolTable<Symbol>,
    alternatives: Vec<Alternative>,
    alternative_index: FxHashMap<(u32, Vec<u32>), usize>,
    // Alternatives grouped by the non-terminal on their LHS.
    alternatives_by_lhs: MultiMap<u32, usize>,
    // Lexical probabilities, searched by category and word.
    lexicon: FxHashMap<(u32, u32), f64>,
}

impl EarleyGrammar {
    pub fn new(start: &str) -> Self {
        let mut nonterminals = SymbolTable::new();
        let start = nonterminals.intify(Symbol::from(start));

        Self {
            start,
            nonterminals,
            terminals: SymbolTable::new(),
            alternatives: vec![],
            alternative_index: FxHashMap::default(),
            alternatives_by_lhs: MultiMap::new(),
            lexicon: FxHashMap::default(),
        }
    }

    /// Reads one weighted rule per non-empty line. A single symbol on the
    /// right-hand side is a lexicon entry, anything longer an alternative.
    ///
    /// The text form has no way to write a chain rule such as `S -> X`: the
    /// line is read as `S` producing the word `X`. Chain rules are added with
    /// [`EarleyGrammar::insert_rule`] and a [`Rule::NonLexical`].
    pub fn parse_weighted(start: &str, rules: &str) -> Result<Self> {
        let mut grammar = Self::new(start);
        for line in rules.lines().filter(|l| !l.trim().is_empty()) {
            grammar.insert_rule(WeightedRule::from_str(line)?)?;
        }
        Ok(grammar)
    }

    /// Adds a rule. Re-inserting a rule replaces its probability.
    pub fn insert_rule(&mut self, weighted_rule: WeightedRule<Symbol, Symbol, f64>) -> Result<()> {
        match weighted_rule.rule {
            Rule::Lexical { lhs, rhs } => {
                let category = self.nonterminals.intify(lhs);
                let word = self.terminals.intify(rhs);
                self.lexicon.insert((category, word), weighted_rule.weight);
            }
            Rule::NonLexical { lhs, rhs } => {
                if rhs.is_empty() {
                    return Err(Error::MalformedRule {
                        lhs: lhs.to_string(),
                        found: 0,
                    });
                }
                let lhs = self.nonterminals.intify(lhs);
                let rhs: Vec<_> = rhs.into_iter().map(|n| self.nonterminals.intify(n)).collect();
                self.insert_alternative(lhs, rhs, weighted_rule.weight);
            }
        }

        Ok(())
    }

    fn insert_alternative(&mut self, lhs: u32, rhs: Vec<u32>, probability: f64) {
        if let Some(&i) = self.alternative_index.get(&(lhs, rhs.clone())) {
            self.alternatives[i].probability = probability;
            return;
        }

        let i = self.alternatives.len();
        self.alternative_index.insert((lhs, rhs.clone()), i);
        self.alternatives_by_lhs.insert(lhs, i);
        self.alternatives.push(Alternative {
            lhs,
            rhs,
            probability,
        });
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    fn alternatives_of(&self, lhs: u32) -> &[usize] {
        self.alternatives_by_lhs
            .get_vec(&lhs)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn nonterminal_name(&self, nt: u32) -> &Symbol {
        self.nonterminals.symbol(nt)
    }

    pub fn terminal_name(&self, t: u32) -> &Symbol {
        self.terminals.symbol(t)
    }
}

impl From<&GrammarModel> for EarleyGrammar {
    fn from(model: &GrammarModel) -> Self {
        let mut grammar = EarleyGrammar::new(model.nonterminal_name(model.start()));

        for (i, rule) in model.binary_rules().iter().enumerate() {
            let lhs = grammar.nonterminals.intify(model.nonterminal_name(rule.lhs).clone());
            let left = grammar.nonterminals.intify(model.nonterminal_name(rule.left).clone());
            let right = grammar.nonterminals.intify(model.nonterminal_name(rule.right).clone());
            grammar.insert_alternative(lhs, vec![left, right], model.probability(RuleId::Binary(i as u32)));
        }

        for (i, rule) in model.unary_rules().iter().enumerate() {
            let category = grammar.nonterminals.intify(model.nonterminal_name(rule.lhs).clone());
            let word = grammar.terminals.intify(model.terminal_name(rule.terminal).clone());
            grammar
                .lexicon
                .insert((category, word), model.probability(RuleId::Unary(i as u32)));
        }

        grammar
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Head {
    /// The dummy item `ROOT -> start`.
    Root,
    Alternative(usize),
}

/// Index into the derivation arena of a parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub head: Head,
    pub dot: usize,
    pub start: usize,
    pub end: usize,
    pub probability: f64,
    /// Derivations of the symbols before the dot.
    pub children: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Derivation {
    Lexical {
        category: u32,
        word: u32,
        position: usize,
        probability: f64,
    },
    Constituent {
        alternative: usize,
        start: usize,
        end: usize,
        probability: f64,
        children: Vec<NodeId>,
    },
}

impl Derivation {
    pub fn probability(&self) -> f64 {
        match self {
            Derivation::Lexical { probability, .. } => *probability,
            Derivation::Constituent { probability, .. } => *probability,
        }
    }
}

type ItemKey = (Head, usize, usize);

#[derive(Debug)]
struct EarleyChart {
    items: Vec<Vec<Item>>,
    index: Vec<FxHashMap<ItemKey, usize>>,
    // Items at each position still waiting to be processed.
    agendas: Vec<VecDeque<usize>>,
}

impl EarleyChart {
    fn new(length: usize) -> Self {
        Self {
            items: vec![vec![]; length],
            index: vec![FxHashMap::default(); length],
            agendas: vec![VecDeque::new(); length],
        }
    }

    /// Adds `item` at position `k`, or replaces the item with the same key if
    /// `item` is strictly more probable. Ties keep the item found first.
    fn add(&mut self, k: usize, item: Item) {
        let key = (item.head, item.dot, item.start);
        match self.index[k].get(&key) {
            Some(&idx) => {
                if item.probability > self.items[k][idx].probability {
                    self.items[k][idx] = item;
                    self.agendas[k].push_back(idx);
                }
            }
            None => {
                let idx = self.items[k].len();
                self.index[k].insert(key, idx);
                self.items[k].push(item);
                self.agendas[k].push_back(idx);
            }
        }
    }

    fn next(&mut self, k: usize) -> Option<Item> {
        let idx = self.agendas[k].pop_front()?;
        Some(self.items[k][idx].clone())
    }
}

pub struct ChartParser<'g> {
    grammar: &'g EarleyGrammar,
}

impl<'g> ChartParser<'g> {
    pub fn new(grammar: &'g EarleyGrammar) -> Self {
        Self { grammar }
    }

    fn rhs(&self, head: Head) -> &'g [u32] {
        match head {
            Head::Root => std::slice::from_ref(&self.grammar.start),
            Head::Alternative(i) => &self.grammar.alternatives[i].rhs,
        }
    }

    fn next_symbol(&self, item: &Item) -> Option<u32> {
        self.rhs(item.head).get(item.dot).copied()
    }

    pub fn parse<T: AsRef<str>>(&self, tokens: &[T]) -> ChartParse<'g> {
        let words: Vec<_> = tokens
            .iter()
            .map(|t| self.grammar.terminals.index(t.as_ref()))
            .collect();
        let n = words.len();

        let mut state = ParseState {
            chart: EarleyChart::new(n + 1),
            arena: vec![],
            leaves: FxHashMap::default(),
        };
        state.chart.add(
            0,
            Item {
                head: Head::Root,
                dot: 0,
                start: 0,
                end: 0,
                probability: 1.0,
                children: vec![],
            },
        );

        // Items are only added at k and k + 1, so earlier positions are final.
        for k in 0..=n {
            while let Some(item) = state.chart.next(k) {
                match self.next_symbol(&item) {
                    None => self.complete(&mut state, k, &item),
                    Some(symbol) => {
                        self.predict(&mut state, k, symbol);
                        if let Some(Some(word)) = words.get(k) {
                            self.scan(&mut state, k, &item, symbol, *word);
                        }
                    }
                }
            }
        }

        let best = state.chart.items[n]
            .iter()
            .filter(|item| item.head == Head::Root && item.dot == 1)
            .min_by_key(|item| Reverse(FloatOrd(item.probability)))
            .map(|item| (item.probability, item.children[0]));

        debug!(
            words = n,
            items = state.chart.items.iter().map(Vec::len).sum::<usize>(),
            nodes = state.arena.len(),
            "earley parse"
        );

        ChartParse {
            grammar: self.grammar,
            items: state.chart.items,
            arena: state.arena,
            best,
        }
    }

    fn predict(&self, state: &mut ParseState, k: usize, symbol: u32) {
        for &i in self.grammar.alternatives_of(symbol) {
            let probability = self.grammar.alternatives[i].probability;
            if probability == 0.0 {
                continue;
            }
            state.chart.add(
                k,
                Item {
                    head: Head::Alternative(i),
                    dot: 0,
                    start: k,
                    end: k,
                    probability,
                    children: vec![],
                },
            );
        }
    }

    fn scan(&self, state: &mut ParseState, k: usize, item: &Item, symbol: u32, word: u32) {
        let probability = match self.grammar.lexicon.get(&(symbol, word)) {
            Some(&p) if p > 0.0 => p,
            _ => return,
        };

        let arena = &mut state.arena;
        let leaf = *state.leaves.entry((symbol, k)).or_insert_with(|| {
            arena.push(Derivation::Lexical {
                category: symbol,
                word,
                position: k,
                probability,
            });
            NodeId(arena.len() - 1)
        });

        let mut children = item.children.clone();
        children.push(leaf);
        state.chart.add(
            k + 1,
            Item {
                head: item.head,
                dot: item.dot + 1,
                start: item.start,
                end: k + 1,
                probability: item.probability * probability,
                children,
            },
        );
    }

    fn complete(&self, state: &mut ParseState, k: usize, item: &Item) {
        let alternative = match item.head {
            Head::Root => return,
            Head::Alternative(i) => i,
        };
        let lhs = self.grammar.alternatives[alternative].lhs;

        state.arena.push(Derivation::Constituent {
            alternative,
            start: item.start,
            end: k,
            probability: item.probability,
            children: item.children.clone(),
        });
        let node = NodeId(state.arena.len() - 1);

        let advanced: Vec<_> = state.chart.items[item.start]
            .iter()
            .filter(|waiting| self.next_symbol(waiting) == Some(lhs))
            .map(|waiting| {
                let mut children = waiting.children.clone();
                children.push(node);
                Item {
                    head: waiting.head,
                    dot: waiting.dot + 1,
                    start: waiting.start,
                    end: k,
                    probability: waiting.probability * item.probability,
                    children,
                }
            })
            .collect();

        for next in advanced {
            state.chart.add(k, next);
        }
    }
}

struct ParseState {
    chart: EarleyChart,
    arena: Vec<Derivation>,
    // Lexical derivations are shared by every item scanning the same category and word.
    leaves: FxHashMap<(u32, usize), NodeId>,
}

/// The filled chart of one sentence.
#[derive(Debug)]
pub struct ChartParse<'g> {
    grammar: &'g EarleyGrammar,
    items: Vec<Vec<Item>>,
    arena: Vec<Derivation>,
    best: Option<(f64, NodeId)>,
}

impl<'g> ChartParse<'g> {
    /// Item lists for positions `0..=n`.
    pub fn chart(&self) -> &[Vec<Item>] {
        &self.items
    }

    /// Items at chart position `k`, in the order they were added.
    pub fn items_at(&self, k: usize) -> &[Item] {
        &self.items[k]
    }

    pub fn num_positions(&self) -> usize {
        self.items.len()
    }

    pub fn node(&self, id: NodeId) -> &Derivation {
        &self.arena[id.0]
    }

    /// Probability of the best derivation, 0 if there is none.
    pub fn probability(&self) -> f64 {
        self.best.map(|(p, _)| p).unwrap_or(0.0)
    }

    pub fn is_parsable(&self) -> bool {
        self.best.is_some()
    }

    pub fn tree(&self) -> Option<Tree<NodeType<Symbol, Symbol>>> {
        self.best.map(|(_, root)| self.subtree(root))
    }

    fn subtree(&self, id: NodeId) -> Tree<NodeType<Symbol, Symbol>> {
        match self.node(id) {
            Derivation::Lexical { category, word, .. } => Tree {
                root: NodeType::NonTerminal(self.grammar.nonterminal_name(*category).clone()),
                children: vec![Tree::leaf(NodeType::Terminal(
                    self.grammar.terminal_name(*word).clone(),
                ))],
            },
            Derivation::Constituent {
                alternative,
                children,
                ..
            } => Tree {
                root: NodeType::NonTerminal(
                    self.grammar
                        .nonterminal_name(self.grammar.alternatives[*alternative].lhs)
                        .clone(),
                ),
                children: children.iter().map(|&c| self.subtree(c)).collect(),
            },
        }
    }
}

impl<'g> fmt::Display for ChartParse<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, items) in self.items.iter().enumerate() {
            writeln!(f, "State {}:", k)?;
            for item in items {
                let (lhs, rhs): (&str, &[u32]) = match item.head {
                    Head::Root => ("ROOT", std::slice::from_ref(&self.grammar.start)),
                    Head::Alternative(i) => {
                        let alternative = &self.grammar.alternatives[i];
                        (
                            self.grammar.nonterminal_name(alternative.lhs).as_str(),
                            alternative.rhs.as_slice(),
                        )
                    }
                };

                write!(f, "  {}..{}: {} →", item.start, item.end, lhs)?;
                for (idx, symbol) in rhs.iter().enumerate() {
                    if idx == item.dot {
                        write!(f, " ・")?;
                    }
                    write!(f, " {}", self.grammar.nonterminal_name(*symbol))?;
                }
                if item.dot == rhs.len() {
                    write!(f, " ・")?;
                }
                writeln!(f, "  {}", item.probability)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::viterbi::ViterbiParser;
    use approx::assert_relative_eq;

    const ATTACHMENT: &str = "
        S -> NP VP 1
        VP -> V NP 0.7
        VP -> VP PP 0.3
        NP -> NP PP 0.2
        PP -> P NP 1
        NP -> john 0.3
        NP -> mary 0.3
        NP -> telescope 0.2
        V -> saw 1
        P -> with 1
    ";

    fn words(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    #[test]
    fn agrees_with_viterbi_on_cnf_grammars() {
        let model = GrammarModel::parse_weighted("S", ATTACHMENT).unwrap();
        let grammar = EarleyGrammar::from(&model);
        let earley = ChartParser::new(&grammar);
        let viterbi = ViterbiParser::new(&model);

        for sentence in [
            "john saw mary",
            "john saw mary with telescope",
            "john saw mary with telescope with john",
            "mary saw john with",
            "saw john",
            "",
        ] {
            let sentence = words(sentence);
            let parse = earley.parse(&sentence);
            assert_relative_eq!(
                parse.probability(),
                viterbi.probability(&sentence),
                max_relative = 1e-12
            );
        }

        let sentence = words("john saw mary with telescope");
        assert_eq!(
            earley.parse(&sentence).tree(),
            viterbi.parse::<crate::parser::weight::Probability, _>(&sentence).tree()
        );
    }

    #[test]
    fn longer_alternatives() {
        let grammar = EarleyGrammar::parse_weighted(
            "S",
            "
            S -> NP VP 1
            VP -> V NP PP 0.4
            VP -> V NP 0.6
            PP -> P NP 1
            NP -> john 0.5
            NP -> mary 0.3
            NP -> telescope 0.2
            V -> saw 1
            P -> with 1
            ",
        )
        .unwrap();
        let parse = ChartParser::new(&grammar).parse(&words("john saw mary with telescope"));

        assert_relative_eq!(parse.probability(), 0.5 * 0.4 * 0.3 * 0.2);
        assert_eq!(
            "(S (NP john) (VP (V saw) (NP mary) (PP (P with) (NP telescope))))",
            format!("{}", parse.tree().unwrap())
        );
    }

    #[test]
    fn chain_rules() {
        let mut grammar = EarleyGrammar::new("S");
        grammar
            .insert_rule(WeightedRule {
                rule: Rule::NonLexical {
                    lhs: Symbol::from("S"),
                    rhs: vec![Symbol::from("X")],
                },
                weight: 1.0,
            })
            .unwrap();
        grammar.insert_rule(WeightedRule::from_str("X -> a 0.5").unwrap()).unwrap();

        let parse = ChartParser::new(&grammar).parse(&["a"]);
        assert_relative_eq!(parse.probability(), 0.5);
        assert_eq!("(S (X a))", format!("{}", parse.tree().unwrap()));
    }

    fn non_lexical(lhs: &str, rhs: &[&str], weight: f64) -> WeightedRule<Symbol, Symbol, f64> {
        WeightedRule {
            rule: Rule::NonLexical {
                lhs: Symbol::from(lhs),
                rhs: rhs.iter().map(|&s| Symbol::from(s)).collect(),
            },
            weight,
        }
    }

    #[test]
    fn unit_cycles_terminate() {
        let mut grammar = EarleyGrammar::new("S");
        grammar.insert_rule(non_lexical("S", &["X"], 0.5)).unwrap();
        grammar.insert_rule(non_lexical("X", &["S"], 0.5)).unwrap();
        grammar.insert_rule(non_lexical("S", &["X", "X"], 0.5)).unwrap();
        grammar.insert_rule(WeightedRule::from_str("X -> a 0.5").unwrap()).unwrap();
        let parser = ChartParser::new(&grammar);

        let parse = parser.parse(&["a"]);
        assert_relative_eq!(parse.probability(), 0.25);
        assert_eq!("(S (X a))", format!("{}", parse.tree().unwrap()));

        let parse = parser.parse(&["a", "a"]);
        assert_relative_eq!(parse.probability(), 0.125);
        assert_eq!("(S (X a) (X a))", format!("{}", parse.tree().unwrap()));
    }

    #[test]
    fn improved_items_propagate() {
        // the better derivation of X over "a b" completes after the worse one
        let mut grammar = EarleyGrammar::new("S");
        grammar.insert_rule(non_lexical("S", &["X", "C"], 1.0)).unwrap();
        grammar.insert_rule(non_lexical("X", &["Y"], 0.9)).unwrap();
        grammar.insert_rule(non_lexical("X", &["A", "B"], 0.1)).unwrap();
        grammar.insert_rule(non_lexical("Y", &["A", "B"], 1.0)).unwrap();
        for rule in ["A -> a 1", "B -> b 1", "C -> c 1"] {
            grammar.insert_rule(WeightedRule::from_str(rule).unwrap()).unwrap();
        }

        let parse = ChartParser::new(&grammar).parse(&["a", "b", "c"]);
        assert_relative_eq!(parse.probability(), 0.9);
        assert_eq!(
            "(S (X (Y (A a) (B b))) (C c))",
            format!("{}", parse.tree().unwrap())
        );
    }

    #[test]
    fn left_recursion_terminates() {
        let grammar = EarleyGrammar::parse_weighted(
            "E",
            "
            E -> E OP N 0.4
            E -> n 0.6
            OP -> + 1
            N -> n 1
            ",
        )
        .unwrap();
        let parse = ChartParser::new(&grammar).parse(&words("n + n + n"));

        assert_relative_eq!(parse.probability(), 0.4 * 0.4 * 0.6);
        assert_eq!(
            "(E (E (E n) (OP +) (N n)) (OP +) (N n))",
            format!("{}", parse.tree().unwrap())
        );
        // ROOT -> ・ E and E -> ・ E OP N, predicted once
        assert_eq!(parse.items_at(0).len(), 2);
        assert_eq!(parse.num_positions(), 6);
    }

    #[test]
    fn chart_grows_polynomially() {
        let model = GrammarModel::parse_weighted("S", "S -> S S 0.4\nS -> s 0.6").unwrap();
        let grammar = EarleyGrammar::from(&model);
        let sentence = vec!["s"; 12];

        let parse = ChartParser::new(&grammar).parse(&sentence);
        assert_relative_eq!(
            parse.probability(),
            ViterbiParser::new(&model).probability(&sentence),
            max_relative = 1e-12
        );
        // at most three dot positions of S -> S S per start, plus the root items
        for k in 0..parse.num_positions() {
            assert!(parse.items_at(k).len() <= 3 * (k + 1) + 2);
        }
    }

    #[test]
    fn single_symbol_text_rules_are_lexical() {
        let grammar = EarleyGrammar::parse_weighted("S", "S -> X 1").unwrap();
        assert!(grammar.alternatives().is_empty());

        let parse = ChartParser::new(&grammar).parse(&["X"]);
        assert_relative_eq!(parse.probability(), 1.0);
        assert_eq!("(S X)", format!("{}", parse.tree().unwrap()));
    }

    #[test]
    fn ties_go_to_the_first_item() {
        let model =
            GrammarModel::parse_weighted("S", "S -> A A 0.5\nS -> B B 0.5\nA -> a 1\nB -> a 1")
                .unwrap();
        let grammar = EarleyGrammar::from(&model);
        let parse = ChartParser::new(&grammar).parse(&["a", "a"]);

        assert_relative_eq!(parse.probability(), 0.5);
        assert_eq!("(S (A a) (A a))", format!("{}", parse.tree().unwrap()));
    }

    #[test]
    fn unparsable_and_empty_input() {
        let model = GrammarModel::parse_weighted("S", ATTACHMENT).unwrap();
        let grammar = EarleyGrammar::from(&model);
        let parser = ChartParser::new(&grammar);

        for sentence in ["saw john", "john saw", "", "john saw bob"] {
            let parse = parser.parse(&words(sentence));
            assert!(!parse.is_parsable());
            assert_eq!(parse.probability(), 0.0);
            assert!(parse.tree().is_none());
        }
    }

    #[test]
    fn empty_alternatives_are_rejected() {
        let mut grammar = EarleyGrammar::new("S");
        let result = grammar.insert_rule(WeightedRule {
            rule: Rule::NonLexical {
                lhs: Symbol::from("S"),
                rhs: vec![],
            },
            weight: 1.0,
        });
        assert!(matches!(result, Err(Error::MalformedRule { found: 0, .. })));
    }

    #[test]
    fn chart_display() {
        let grammar = EarleyGrammar::parse_weighted("S", "S -> A B 1\nA -> a 1\nB -> b 1").unwrap();
        let parse = ChartParser::new(&grammar).parse(&["a", "b"]);
        let shown = format!("{}", parse);

        assert!(shown.starts_with("State 0:\n  0..0: ROOT → ・ S  1\n  0..0: S → ・ A B  1\n"));
        assert!(shown.contains("  0..2: ROOT → S ・  1\n"));
    }
}
