use std::error::Error;
use std::fs;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

use clap::{ArgEnum, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pcfg_em::generate::{Generator, GeneratorConfig, Sampling};
use pcfg_em::grammar::GrammarModel;
use pcfg_em::parser::earley::{ChartParser, EarleyGrammar};
use pcfg_em::parser::recognise;
use pcfg_em::parser::scoring::{
    BracketMarkers, BracketRatios, BracketScorer, MismatchTable, SpanScorer,
};
use pcfg_em::parser::viterbi::ViterbiParser;
use pcfg_em::parser::weight::{LogProbability, Probability};
use pcfg_em::sentence::Sentence;
use pcfg_em::training::{EmTrainer, TrainingConfig};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reads sentences from STDIN and prints whether the grammar derives them.
    Recognise {
        rules: String,
        #[clap(short, long, default_value_t = String::from("S"))]
        initial_nonterminal: String,
    },
    /// Reads sentences from STDIN and prints their most probable derivation.
    /// Without [PROBABILITIES] the rules file has to carry the weights.
    Parse {
        rules: String,
        probabilities: Option<String>,
        #[clap(short, long, default_value_t=ParsingParadigma::Cyk, arg_enum)]
        paradigma: ParsingParadigma,
        #[clap(short, long, default_value_t = String::from("S"))]
        initial_nonterminal: String,
        /// Compute in log space.
        #[clap(short, long)]
        log: bool,
        /// Non-terminals that take part in soft bracketing.
        #[clap(long, use_value_delimiter = true)]
        flagged: Vec<String>,
        #[clap(long, default_value_t = String::from("["))]
        open: String,
        #[clap(long, default_value_t = String::from("]"))]
        close: String,
        #[clap(long, default_value_t = 1.0)]
        mismatch_ratio: f64,
        #[clap(long, default_value_t = 1.0)]
        start_ratio: f64,
        #[clap(long, default_value_t = 1.0)]
        accelerate_ratio: f64,
    },
    /// Estimates rule probabilities from the sentences in CORPUS and prints
    /// the weighted rules to STDOUT.
    Train {
        rules: String,
        corpus: String,
        #[clap(short, long, default_value_t = String::from("S"))]
        initial_nonterminal: String,
        #[clap(long, default_value_t = 5)]
        iterations: usize,
        #[clap(long, default_value_t = 0)]
        seed: u64,
    },
    /// Prints sentences sampled from the grammar.
    Generate {
        rules: String,
        probabilities: Option<String>,
        #[clap(short, long, default_value_t = String::from("S"))]
        initial_nonterminal: String,
        #[clap(short, long, default_value_t = 1)]
        count: usize,
        #[clap(long, default_value_t = 0)]
        seed: u64,
        /// Sample from a pool of 1000 slots per non-terminal.
        #[clap(long)]
        pool: bool,
        #[clap(long, default_value_t = 100)]
        max_depth: usize,
    },
}

#[derive(ArgEnum, Copy, Clone, PartialEq, Eq)]
enum ParsingParadigma {
    Cyk,
    Deductive,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Commands::Recognise {
            rules,
            initial_nonterminal,
        } => {
            let grammar = GrammarModel::parse(initial_nonterminal, &fs::read_to_string(rules)?)?;

            for sentence in read_sentences(io::stdin().lock()) {
                writeln!(out, "{}", recognise(&grammar, &sentence.0))?;
            }
        }
        Commands::Parse {
            rules,
            probabilities,
            paradigma,
            initial_nonterminal,
            log,
            flagged,
            open,
            close,
            mismatch_ratio,
            start_ratio,
            accelerate_ratio,
        } => {
            let grammar = load_grammar(rules, probabilities.as_deref(), initial_nonterminal)?;
            let sentences = read_sentences(io::stdin().lock());

            match paradigma {
                ParsingParadigma::Deductive => {
                    let earley = EarleyGrammar::from(&grammar);
                    let parser = ChartParser::new(&earley);

                    for sentence in sentences {
                        let parse = parser.parse(&sentence.0);
                        match parse.tree() {
                            Some(tree) => writeln!(out, "{}\t{}", tree, parse.probability())?,
                            None => writeln!(out, "(NOPARSE {})", sentence)?,
                        }
                    }
                }
                ParsingParadigma::Cyk if flagged.is_empty() => {
                    let parser = ViterbiParser::new(&grammar);
                    for sentence in sentences {
                        write_viterbi(&mut out, &parser, &sentence, *log)?;
                    }
                }
                ParsingParadigma::Cyk => {
                    let grammar = grammar.with_flagged(flagged)?;
                    let markers = BracketMarkers {
                        open: open.as_str().into(),
                        close: close.as_str().into(),
                    };
                    let ratios = BracketRatios {
                        mismatch: *mismatch_ratio,
                        start: *start_ratio,
                        accelerate: *accelerate_ratio,
                    };

                    for marked in sentences {
                        let (sentence, table) = MismatchTable::split(&marked.0, &markers);
                        let parser =
                            ViterbiParser::with_scorer(&grammar, BracketScorer::new(table, ratios));
                        write_viterbi(&mut out, &parser, &sentence, *log)?;
                    }
                }
            }
        }
        Commands::Train {
            rules,
            corpus,
            initial_nonterminal,
            iterations,
            seed,
        } => {
            let mut grammar =
                GrammarModel::parse(initial_nonterminal, &fs::read_to_string(rules)?)?;
            let corpus = read_sentences(io::BufReader::new(fs::File::open(corpus)?));
            info!(sentences = corpus.len(), "read corpus");

            let mut trainer = EmTrainer::new(TrainingConfig {
                iterations: *iterations,
                seed: *seed,
            });
            trainer.initialise(&mut grammar)?;
            trainer.train(&mut grammar, &corpus)?;

            grammar.write_rules(&mut out)?;
        }
        Commands::Generate {
            rules,
            probabilities,
            initial_nonterminal,
            count,
            seed,
            pool,
            max_depth,
        } => {
            let grammar = load_grammar(rules, probabilities.as_deref(), initial_nonterminal)?;
            let sampling = if *pool {
                Sampling::Pool { resolution: 1000 }
            } else {
                Sampling::Direct
            };
            let mut generator = Generator::new(
                &grammar,
                GeneratorConfig {
                    sampling,
                    max_depth: *max_depth,
                },
                StdRng::seed_from_u64(*seed),
            );

            for _ in 0..*count {
                writeln!(out, "{}", generator.generate()?)?;
            }
        }
    }

    Ok(())
}

fn load_grammar(
    rules: &str,
    probabilities: Option<&str>,
    initial_nonterminal: &str,
) -> Result<GrammarModel, Box<dyn Error>> {
    let rules = fs::read_to_string(rules)?;

    let grammar = match probabilities {
        Some(path) => {
            let mut grammar = GrammarModel::parse(initial_nonterminal, &rules)?;
            grammar.parse_probabilities(&fs::read_to_string(path)?)?;
            grammar
        }
        None => GrammarModel::parse_weighted(initial_nonterminal, &rules)?,
    };

    if let Err(e) = grammar.check_normalisation() {
        warn!("{}", e);
    }

    Ok(grammar)
}

fn read_sentences<R: BufRead>(reader: R) -> Vec<Sentence> {
    reader
        .lines()
        .filter_map(|l| {
            if let Err(e) = &l {
                warn!("error when reading line: {}", e);
            }
            l.ok()
        })
        .map(|l| Sentence::from_str(&l))
        .filter_map(|s| {
            if let Err(e) = &s {
                warn!("error when parsing sentence: {}", e);
            }
            s.ok()
        })
        .collect()
}

fn write_viterbi<W, S>(
    out: &mut W,
    parser: &ViterbiParser<S>,
    sentence: &Sentence,
    log: bool,
) -> io::Result<()>
where
    W: Write,
    S: SpanScorer,
{
    let (tree, score) = if log {
        let parse = parser.parse::<LogProbability, _>(&sentence.0);
        (parse.tree(), parse.weight().value())
    } else {
        let parse = parser.parse::<Probability, _>(&sentence.0);
        (parse.tree(), parse.probability())
    };

    match tree {
        Some(tree) => writeln!(out, "{}\t{}", tree, score),
        None => writeln!(out, "(NOPARSE {})", sentence),
    }
}
