use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pcfg_em::parser::earley::{ChartParser, EarleyGrammar};
use pcfg_em::parser::viterbi::ViterbiParser;
use pcfg_em::parser::weight::LogProbability;
use pcfg_em::training::ExpectedCounts;
use pcfg_em::GrammarModel;

const GRAMMAR_SRC: &str = "
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

fn criterion_benchmark(c: &mut Criterion) {
    let grammar = GrammarModel::parse_weighted("S", GRAMMAR_SRC).unwrap();
    let earley = EarleyGrammar::from(&grammar);
    let input = "john saw mary with telescope with john with mary"
        .split(' ')
        .collect::<Vec<_>>();

    c.bench_function("viterbi", |b| {
        let parser = ViterbiParser::new(&grammar);
        b.iter(|| parser.probability(black_box(&input)))
    });

    c.bench_function("viterbi log space", |b| {
        let parser = ViterbiParser::new(&grammar);
        b.iter(|| parser.parse::<LogProbability, _>(black_box(&input)).probability())
    });

    c.bench_function("earley", |b| {
        let parser = ChartParser::new(&earley);
        b.iter(|| parser.parse(black_box(&input)).probability())
    });

    c.bench_function("expected counts", |b| {
        b.iter(|| ExpectedCounts::for_sentence(&grammar, black_box(&input)).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
