use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use itertools::Itertools;
use clap::Parser;
use log::{debug, info};
use thiserror::Error;

#[cfg(test)]
use rstest::rstest;

const DEFAULT_BOUND: usize = 3;
const WARN_BOUND: usize = 20;
const DEFAULT_MARGIN: usize = 2;
const MAX_MARGIN: usize = 16;

const WARNING: &str = "You've been warned... Press Ctrl+C to quit while the program is still running.";
const NO_DIFFERENCES: &str = "no differences between iterative version and EBNF version except the special cases (0, 0, 0) and (1, 0, 0)";

/// Counts of leading "human", "driver", and trailing "human" tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Triple {
    m: usize,
    n: usize,
    p: usize,
}
impl Triple {
    const fn new(m: usize, n: usize, p: usize) -> Self {
        Self { m, n, p }
    }
}
impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.m, self.n, self.p)
    }
}

const EMPTY: Triple = Triple::new(0, 0, 0);
const SOLE_HUMAN: Triple = Triple::new(1, 0, 0);

type Triples = BTreeSet<Triple>;

fn render(t: Triple) -> String {
    itertools::repeat_n("human", t.m)
        .chain(itertools::repeat_n("driver", t.n))
        .chain(itertools::repeat_n("human", t.p))
        .join(" ")
}
#[test]
fn test_render() {
    assert_eq!(render(EMPTY), "");
    assert_eq!(render(SOLE_HUMAN), "human");
    assert_eq!(render(Triple::new(0, 0, 1)), "human");
    assert_eq!(render(Triple::new(0, 2, 0)), "driver driver");
    assert_eq!(render(Triple::new(2, 1, 0)), "human human driver");
    assert_eq!(render(Triple::new(1, 1, 1)), "human driver human");
    assert_eq!(render(Triple::new(3, 2, 1)), "human human human driver driver human");
}

fn enumerate(bound: usize) -> BTreeMap<Triple, String> {
    let mut res = BTreeMap::new();
    for n in 0..=bound {
        for p in 0..=1 {
            for m in 0..=n + 1 - p {
                let t = Triple::new(m, n, p);
                res.insert(t, render(t));
            }
        }
    }
    res
}
fn cardinality(bound: usize) -> usize {
    (bound + 1) * (bound + 3)
}
#[test]
fn test_enumerate_small() {
    let zero: Triples = enumerate(0).into_keys().collect();
    assert_eq!(zero, Triples::from([EMPTY, SOLE_HUMAN, Triple::new(0, 0, 1)]));

    let one: Triples = enumerate(1).into_keys().collect();
    let expected: Triples = [
        (0, 0, 0), (1, 0, 0), (0, 0, 1),
        (0, 1, 0), (1, 1, 0), (2, 1, 0),
        (0, 1, 1), (1, 1, 1),
    ].into_iter().map(|(m, n, p)| Triple::new(m, n, p)).collect();
    assert_eq!(one, expected);
}
#[test]
fn test_enumerate_cardinality() {
    for bound in 0..16 {
        let res = enumerate(bound);
        assert_eq!(res.len(), cardinality(bound));
        for (t, s) in res.iter() {
            assert!(t.p <= 1 && t.m + t.p <= t.n + 1 && t.n <= bound);
            assert_eq!(*s, render(*t));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Terminal(Triple),
    Branches(Rc<[Node]>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Rule {
    Human,
    Driver,
}

/// Expands the two production rules, memoized on (rule, steps, triple).
///
/// human  = ["human"] driver | [driver] "human"
/// driver = ["human"] [driver] "driver"
#[derive(Default)]
struct Expander {
    cache: HashMap<(Rule, usize, Triple), Node>,
}
impl Expander {
    fn new() -> Self {
        Default::default()
    }
    fn expand(&mut self, steps: usize) -> Node {
        self.human(steps, EMPTY)
    }
    fn human(&mut self, steps: usize, t: Triple) -> Node {
        self.memo(Rule::Human, steps, t)
    }
    fn driver(&mut self, steps: usize, t: Triple) -> Node {
        self.memo(Rule::Driver, steps, t)
    }
    fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn memo(&mut self, rule: Rule, steps: usize, t: Triple) -> Node {
        if let Some(node) = self.cache.get(&(rule, steps, t)) {
            return node.clone();
        }
        let node = if steps == 0 {
            Node::Terminal(t)
        } else {
            let Triple { m, n, p } = t;
            let alts = match rule {
                Rule::Human => vec![
                    self.driver(steps - 1, Triple::new(m, n, p)),     // driver
                    self.driver(steps - 1, Triple::new(m + 1, n, p)), // "human" driver
                    Node::Terminal(Triple::new(m, n, p + 1)),          // "human"
                    self.driver(steps - 1, Triple::new(m, n, p + 1)), // driver "human"
                ],
                Rule::Driver => vec![
                    Node::Terminal(Triple::new(m, n + 1, p)),              // "driver"
                    self.driver(steps - 1, Triple::new(m, n + 1, p)),     // driver "driver"
                    Node::Terminal(Triple::new(m + 1, n + 1, p)),          // "human" "driver"
                    self.driver(steps - 1, Triple::new(m + 1, n + 1, p)), // "human" driver "driver"
                ],
            };
            Node::Branches(alts.into())
        };
        self.cache.insert((rule, steps, t), node.clone());
        node
    }
}
#[test]
fn test_expand_shallow() {
    let mut expander = Expander::new();
    assert_eq!(expander.expand(0), Node::Terminal(EMPTY));

    let one = expander.expand(1);
    let expected = Node::Branches(vec![
        Node::Terminal(EMPTY),
        Node::Terminal(SOLE_HUMAN),
        Node::Terminal(Triple::new(0, 0, 1)),
        Node::Terminal(Triple::new(0, 0, 1)),
    ].into());
    assert_eq!(one, expected);

    let driver = expander.driver(1, Triple::new(0, 2, 1));
    let expected = Node::Branches(vec![
        Node::Terminal(Triple::new(0, 3, 1)),
        Node::Terminal(Triple::new(0, 3, 1)),
        Node::Terminal(Triple::new(1, 3, 1)),
        Node::Terminal(Triple::new(1, 3, 1)),
    ].into());
    assert_eq!(driver, expected);
}
#[test]
fn test_expand_memoized() {
    let mut expander = Expander::new();
    let t = Triple::new(1, 2, 0);
    let first = expander.driver(5, t);
    let len = expander.cache_len();
    let second = expander.driver(5, t);
    assert_eq!(first, second);
    assert_eq!(expander.cache_len(), len);
    match (&first, &second) {
        (Node::Branches(a), Node::Branches(b)) => assert!(Rc::ptr_eq(a, b)),
        _ => panic!("expected branches"),
    }

    assert_eq!(first, Expander::new().driver(5, t));
    assert_eq!(expander.expand(6), Expander::new().expand(6));
    assert_ne!(expander.human(5, t), expander.driver(5, t));
}

fn flatten(node: &Node) -> Triples {
    fn walk(node: &Node, seen: &mut HashSet<*const Node>, res: &mut Triples) {
        match node {
            Node::Terminal(t) => {
                res.insert(*t);
            }
            Node::Branches(children) => {
                // subtrees are shared through the memo cache
                if seen.insert(children.as_ptr()) {
                    for child in children.iter() {
                        walk(child, seen, res);
                    }
                }
            }
        }
    }
    let mut res = Triples::new();
    walk(node, &mut HashSet::new(), &mut res);
    res
}
#[test]
fn test_flatten_matches_naive() {
    fn naive(node: &Node, res: &mut Triples) {
        match node {
            Node::Terminal(t) => { res.insert(*t); }
            Node::Branches(children) => children.iter().for_each(|c| naive(c, res)),
        }
    }
    let mut expander = Expander::new();
    for steps in 0..8 {
        let tree = expander.expand(steps);
        let mut expected = Triples::new();
        naive(&tree, &mut expected);
        assert_eq!(flatten(&tree), expected);
    }

    let nested = Node::Branches(vec![
        Node::Terminal(Triple::new(0, 1, 0)),
        Node::Branches(vec![
            Node::Branches(vec![Node::Terminal(Triple::new(2, 1, 0))].into()),
            Node::Terminal(Triple::new(0, 1, 0)),
        ].into()),
    ].into());
    assert_eq!(flatten(&nested), Triples::from([Triple::new(0, 1, 0), Triple::new(2, 1, 0)]));
}

struct Comparison {
    bound: usize,
    margin: usize,
    enumerated: BTreeMap<Triple, String>,
    expanded: Triples,
    diff: Triples,
}
impl Comparison {
    fn steps(&self) -> usize {
        self.bound.saturating_add(self.margin)
    }
    // the expander still yields (0, 0, 0) and (1, 0, 0) at bound 0
    fn agrees(&self) -> bool {
        self.diff.is_empty() || self.bound == 0
    }
}

fn compare(bound: usize, margin: usize) -> Comparison {
    if margin > MAX_MARGIN {
        debug!("clamping margin {} to {}", margin, MAX_MARGIN);
    }
    let margin = margin.min(MAX_MARGIN);
    let enumerated = enumerate(bound);
    let mut iterative: Triples = enumerated.keys().copied().collect();
    iterative.remove(&EMPTY);
    iterative.remove(&SOLE_HUMAN);

    let steps = bound.saturating_add(margin);
    let mut expander = Expander::new();
    let tree = expander.expand(steps);
    debug!("expanded {} steps with {} memo entries", steps, expander.cache_len());
    let expanded: Triples = flatten(&tree).into_iter().filter(|t| t.n <= bound).collect();

    let diff: Triples = iterative.symmetric_difference(&expanded).copied().collect();
    debug!("iterative: {}, ebnf: {}, diff: {}", iterative.len(), expanded.len(), diff.len());
    Comparison { bound, margin, enumerated, expanded, diff }
}
#[cfg(test)]
#[rstest]
fn test_margins_agree(#[values(0, 1, 2, 3, 4, 5, 6)] bound: usize, #[values(2, 3, 4, 5)] margin: usize) {
    let res = compare(bound, margin);
    assert!(res.diff.is_empty(), "bound {} margin {}: {:?}", bound, margin, res.diff);
    assert!(res.agrees());
}
#[cfg(test)]
#[rstest]
#[case(1)]
#[case(2)]
#[case(5)]
fn test_margin_one_is_enough(#[case] bound: usize) {
    assert!(compare(bound, 1).diff.is_empty());
}
#[test]
fn test_degenerate_bound() {
    let res = compare(0, 1);
    assert_eq!(res.diff, Triples::from([EMPTY, SOLE_HUMAN]));
    assert!(res.agrees());

    let res = compare(1, 0);
    assert!(!res.agrees());
    assert_eq!(res.expanded, Triples::from([EMPTY, SOLE_HUMAN, Triple::new(0, 0, 1)]));
}
#[test]
fn test_oversized_margin_is_clamped() {
    let res = compare(3, usize::MAX);
    assert_eq!(res.margin, MAX_MARGIN);
    assert_eq!(res.steps(), 3 + MAX_MARGIN);
    assert!(res.diff.is_empty());
    assert_eq!(probe(1, usize::MAX).len(), MAX_MARGIN + 1);
}

fn print_triples<'a, W: Write, I: IntoIterator<Item = &'a Triple>>(out: &mut W, triples: I) -> io::Result<()> {
    for t in triples {
        writeln!(out, "{}: {}", t, render(*t))?;
    }
    Ok(())
}

fn report<W: Write>(bound: usize, margin: usize, out: &mut W) -> io::Result<()> {
    let res = compare(bound, margin);

    writeln!(out, "human_driver_iterative_dict: max_drivers={}", bound)?;
    for (t, s) in res.enumerated.iter() {
        writeln!(out, "{}: {}", t, s)?;
    }
    writeln!(out)?;

    if res.agrees() {
        writeln!(out, "{}", NO_DIFFERENCES)?;
    } else {
        writeln!(out, "human_driver_ebnf_tree")?;
        print_triples(out, &res.expanded)?;
        writeln!(out)?;
        writeln!(out, "diff")?;
        writeln!(out, "[{}]", res.diff.iter().join(", "))?;
    }
    writeln!(out)
}
#[cfg(test)]
fn report_string(bound: usize, margin: usize) -> String {
    let mut out = Vec::new();
    report(bound, margin, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}
#[test]
fn test_report_agreement() {
    let text = report_string(3, DEFAULT_MARGIN);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "human_driver_iterative_dict: max_drivers=3");
    assert_eq!(&lines[1..5], &["(0, 0, 0): ", "(0, 0, 1): human", "(0, 1, 0): driver", "(0, 1, 1): driver human"]);
    assert_eq!(lines[1 + cardinality(3) - 1], "(4, 3, 0): human human human human driver driver driver");
    assert_eq!(&lines[1 + cardinality(3)..], &["", NO_DIFFERENCES, ""]);
    assert!(!text.contains("\ndiff\n"));
    assert!(!text.contains("human_driver_ebnf_tree"));
}
#[test]
fn test_report_degenerate() {
    let text = report_string(0, 1);
    assert!(text.ends_with(&format!("(1, 0, 0): human\n\n{}\n\n", NO_DIFFERENCES)));
}
#[test]
fn test_report_mismatch() {
    let text = report_string(1, 0);
    let tail = "\nhuman_driver_ebnf_tree\n(0, 0, 0): \n(0, 0, 1): human\n(1, 0, 0): human\n\ndiff\n\
        [(0, 0, 0), (0, 1, 0), (0, 1, 1), (1, 0, 0), (1, 1, 0), (1, 1, 1), (2, 1, 0)]\n\n";
    assert!(text.ends_with(tail), "{}", text);
    assert!(!text.contains(NO_DIFFERENCES));
}

fn print_probe<W: Write>(bound: usize, max_margin: usize, out: &mut W) -> io::Result<()> {
    let results = probe(bound, max_margin);
    writeln!(out, "margin probe: max_drivers={}", bound)?;
    for res in results.iter() {
        info!("margin {} agrees: {}", res.margin, res.agrees());
        writeln!(out, "margin {}: {} steps, {} ebnf triples, {} differences", res.margin, res.steps(), res.expanded.len(), res.diff.len())?;
    }
    match stable_margin(&results) {
        Some(margin) => writeln!(out, "agreement from margin {} onwards", margin)?,
        None => writeln!(out, "no agreeing margin up to {}", max_margin)?,
    }
    writeln!(out)
}
fn probe(bound: usize, max_margin: usize) -> Vec<Comparison> {
    (0..=max_margin.min(MAX_MARGIN)).map(|margin| compare(bound, margin)).collect()
}
fn stable_margin(results: &[Comparison]) -> Option<usize> {
    results.iter().rev().take_while(|res| res.agrees()).last().map(|res| res.margin)
}
#[test]
fn test_probe() {
    let results = probe(3, 4);
    assert_eq!(results.len(), 5);
    assert!(!results[0].agrees());
    assert_eq!(stable_margin(&results), Some(1));
    assert_eq!(stable_margin(&probe(4, 0)), None);

    let mut out = Vec::new();
    print_probe(2, 3, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("margin probe: max_drivers=2\nmargin 0: 2 steps, "));
    assert!(text.contains("margin 3: 5 steps, 13 ebnf triples, 0 differences\n"));
    assert!(text.ends_with("agreement from margin 1 onwards\n\n"));
}

#[derive(Debug, Error, PartialEq, Eq)]
enum InputError {
    #[error("not an integer: '{0}'")]
    NotAnInteger(String),
    #[error("negative bound: {0}")]
    Negative(i64),
    #[error("margin too large: {0}")]
    MarginTooLarge(usize),
}

fn parse_bound(raw: &str) -> Result<usize, InputError> {
    let raw = raw.trim();
    let not_an_integer = || InputError::NotAnInteger(raw.to_owned());
    // underscores may only separate digits, as in "1_000"
    let digits = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    if digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(not_an_integer());
    }
    let value: i64 = raw.replace('_', "").parse().map_err(|_| not_an_integer())?;
    usize::try_from(value).map_err(|_| InputError::Negative(value))
}
fn parse_margin(raw: &str) -> Result<usize, InputError> {
    let raw = raw.trim();
    let value: usize = raw.parse().map_err(|_| InputError::NotAnInteger(raw.to_owned()))?;
    if value > MAX_MARGIN {
        return Err(InputError::MarginTooLarge(value));
    }
    Ok(value)
}
#[test]
fn test_parse_margin() {
    assert_eq!(parse_margin("0"), Ok(0));
    assert_eq!(parse_margin("16"), Ok(MAX_MARGIN));
    assert_eq!(parse_margin("17"), Err(InputError::MarginTooLarge(17)));
    assert_eq!(parse_margin("18446744073709551615"), Err(InputError::MarginTooLarge(usize::MAX)));
    assert_eq!(parse_margin("-2"), Err(InputError::NotAnInteger("-2".into())));
    assert!(Args::try_parse_from(["human-driver", "3", "--margin", "18446744073709551615"]).is_err());
    assert!(Args::try_parse_from(["human-driver", "3", "--probe", "99"]).is_err());
    let args = Args::try_parse_from(["human-driver", "-1"]).unwrap();
    assert_eq!(args.max_drivers.as_deref(), Some("-1"));
    assert_eq!(args.margin, DEFAULT_MARGIN);
}

#[test]
fn test_parse_bound() {
    assert_eq!(parse_bound("3"), Ok(3));
    assert_eq!(parse_bound("  12\n"), Ok(12));
    assert_eq!(parse_bound("+7"), Ok(7));
    assert_eq!(parse_bound("-1"), Err(InputError::Negative(-1)));
    assert_eq!(parse_bound("abc"), Err(InputError::NotAnInteger("abc".into())));
    assert_eq!(parse_bound("2.5"), Err(InputError::NotAnInteger("2.5".into())));
    assert_eq!(parse_bound(""), Err(InputError::NotAnInteger("".into())));
    assert_eq!(parse_bound("1_0"), Ok(10));
    assert_eq!(parse_bound("-1_0"), Err(InputError::Negative(-10)));
    assert_eq!(parse_bound("_10"), Err(InputError::NotAnInteger("_10".into())));
    assert_eq!(parse_bound("10_"), Err(InputError::NotAnInteger("10_".into())));
    assert_eq!(parse_bound("1__0"), Err(InputError::NotAnInteger("1__0".into())));
    assert_eq!(parse_bound("99999999999999999999"), Err(InputError::NotAnInteger("99999999999999999999".into())));
}

fn resolve_bound<W: Write>(raw: &str, out: &mut W) -> io::Result<usize> {
    let bound = match parse_bound(raw) {
        Ok(bound) => {
            if bound > WARN_BOUND {
                writeln!(out, "{}", WARNING)?;
            }
            bound
        }
        Err(e) => {
            debug!("falling back to {}: {}", DEFAULT_BOUND, e);
            writeln!(out, "Invalid input. Defaulting to max_drivers={}", DEFAULT_BOUND)?;
            DEFAULT_BOUND
        }
    };
    writeln!(out)?;
    Ok(bound)
}
fn prompt() -> String {
    format!("Please input the max number of drivers (anything greater than {} will take a while to run): ", WARN_BOUND)
}
fn read_bound<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> io::Result<usize> {
    write!(out, "{}", prompt())?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    resolve_bound(&line, out)
}
#[cfg(test)]
#[rstest]
#[case("3\n", 3, "\n")]
#[case("0\n", 0, "\n")]
#[case("20\n", 20, "\n")]
#[case("21\n", 21, "You've been warned... Press Ctrl+C to quit while the program is still running.\n\n")]
#[case("-1\n", 3, "Invalid input. Defaulting to max_drivers=3\n\n")]
#[case("abc\n", 3, "Invalid input. Defaulting to max_drivers=3\n\n")]
#[case("", 3, "Invalid input. Defaulting to max_drivers=3\n\n")]
fn test_read_bound(#[case] input: &str, #[case] bound: usize, #[case] after_prompt: &str) {
    let mut out = Vec::new();
    assert_eq!(read_bound(&mut input.as_bytes(), &mut out).unwrap(), bound);
    assert_eq!(String::from_utf8(out).unwrap(), format!("{}{}", prompt(), after_prompt));
}
#[test]
fn test_prompt_follows_warn_bound() {
    assert_eq!(prompt(), "Please input the max number of drivers (anything greater than 20 will take a while to run): ");
    let mut out = Vec::new();
    assert_eq!(resolve_bound("x", &mut out).unwrap(), DEFAULT_BOUND);
    assert_eq!(String::from_utf8(out).unwrap(), format!("Invalid input. Defaulting to max_drivers={}\n\n", DEFAULT_BOUND));
}

#[derive(Parser)]
#[clap(about = "Enumerates human driver strings two ways and checks that they agree")]
struct Args {
    /// Max number of drivers; prompts on stdin when omitted
    #[clap(allow_hyphen_values = true)]
    max_drivers: Option<String>,
    /// Extra expansion steps beyond the max number of drivers
    #[clap(long, default_value_t = DEFAULT_MARGIN, value_parser = parse_margin)]
    margin: usize,
    /// Also compare every margin from 0 up to this value
    #[clap(long, value_parser = parse_margin)]
    probe: Option<usize>,
}

fn main() -> io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let bound = match args.max_drivers.as_deref() {
        Some(raw) => resolve_bound(raw, &mut out)?,
        None => read_bound(&mut io::stdin().lock(), &mut out)?,
    };
    debug!("max_drivers={} margin={}", bound, args.margin);

    report(bound, args.margin, &mut out)?;
    if let Some(max_margin) = args.probe {
        print_probe(bound, max_margin, &mut out)?;
    }
    Ok(())
}

#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;

    fn unrender(s: &str) -> Triple {
        let words: Vec<&str> = s.split(' ').filter(|w| !w.is_empty()).collect();
        let m = words.iter().take_while(|w| **w == "human").count();
        let n = words[m..].iter().take_while(|w| **w == "driver").count();
        let p = words.len() - m - n;
        assert!(words[m + n..].iter().all(|w| *w == "human"));
        Triple::new(m, n, p)
    }

    proptest! {
        #[test]
        fn render_round_trip(n in 1usize..12, p in 0usize..=1, seed in 0usize..64) {
            let t = Triple::new(seed % (n + 2 - p), n, p);
            prop_assert_eq!(unrender(&render(t)), t);
        }

        #[test]
        fn expander_within_closed_form(bound in 1usize..6, margin in 1usize..4) {
            for t in flatten(&Expander::new().expand(bound + margin)) {
                prop_assert!(t.p <= 1 && t.m + t.p <= t.n + 1);
                prop_assert!(t.n >= 1 || t == Triple::new(0, 0, 1));
            }
        }
    }
}
