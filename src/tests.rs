//! Unit tests for the interpreter and the perceptron models

use crate::*;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Cursor;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Helper to build a feature vector from `(id, value)` pairs
fn fv(entries: &[(u32, f64)]) -> FeatureVector {
    entries.iter().copied().collect()
}

/// Helper to build a compiled candidate set
fn set(key: &str, candidates: &[(&[(u32, f64)], bool)]) -> CandidateSet {
    CandidateSet::new(
        key,
        candidates
            .iter()
            .map(|(features, is_reference)| Candidate::new(fv(features), *is_reference))
            .collect(),
    )
}

/// Helper to build a candidate set with named features
fn named_set(key: &str, candidates: &[(&[(&str, f64)], bool)]) -> CandidateSet {
    CandidateSet::new(
        key,
        candidates
            .iter()
            .map(|(features, is_reference)| {
                let named = features.iter().map(|(n, v)| (n.to_string(), *v)).collect();
                Candidate::symbolic(named, *is_reference)
            })
            .collect(),
    )
}

fn build_model(registry: &FactoryRegistry, spec: &str) -> PerceptronModel {
    let mut env = Environment::new();
    Interpreter::new(registry)
        .parse_and_build(spec, &mut env)
        .unwrap()
        .to_owned_object::<ModelFamily>()
        .expect("spec should build a model")
}

/// Small corpus where the reference is never the first candidate
fn toy_corpus() -> Vec<CandidateSet> {
    vec![
        set("s1", &[(&[(0, 1.0), (2, 1.0)], false), (&[(1, 1.0)], true)]),
        set("s2", &[(&[(0, 1.0)], false), (&[(1, 1.0), (2, 0.5)], true), (&[(3, 1.0)], false)]),
        set("s3", &[(&[(3, 2.0)], false), (&[(2, 1.0), (1, 1.0)], true)]),
        set("s4", &[(&[(1, 1.0), (3, 1.0)], true), (&[(0, 2.0)], false)]),
    ]
}

/// Source reading JSON lines from an in-memory string
struct TextSource(String);

impl CandidateSetSource for TextSource {
    fn open(&self) -> Result<Box<dyn CandidateSetReader + '_>, ReadError> {
        Ok(Box::new(JsonLinesReader::new(Cursor::new(self.0.as_bytes()))))
    }
}

// --- test-only component family -------------------------------------------

trait Node: Debug + Send + Sync {
    fn total(&self) -> i64;
}

struct NodeFamily;

impl Family for NodeFamily {
    const NAME: &'static str = "Node";
    type Object = dyn Node;
}

#[derive(Debug, Default)]
struct NodeA {
    x: Option<Arc<dyn Node>>,
}

impl Node for NodeA {
    fn total(&self) -> i64 {
        self.x.as_ref().map_or(0, |x| x.total())
    }
}

impl FactoryConstructible for NodeA {
    type Family = NodeFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add("x", false, |a: &mut Self, v: Shared<NodeFamily>| a.x = Some(v.into_inner()))
            .positional(&["x"]);
    }

    fn finish(self) -> Result<Arc<dyn Node>, SpecError> {
        let p: Arc<dyn Node> = Arc::new(self);
        Ok(p)
    }
}

#[derive(Debug, Default)]
struct NodeB {
    y: i64,
}

impl Node for NodeB {
    fn total(&self) -> i64 {
        self.y
    }
}

impl FactoryConstructible for NodeB {
    type Family = NodeFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add("y", true, |b: &mut Self, v: i64| b.y = v).positional(&["y"]);
    }

    fn finish(self) -> Result<Arc<dyn Node>, SpecError> {
        let p: Arc<dyn Node> = Arc::new(self);
        Ok(p)
    }
}

fn node_registry() -> FactoryRegistry {
    let mut builder = FactoryRegistry::builder();
    builder
        .register::<NodeA>("A")
        .unwrap()
        .register::<NodeB>("B")
        .unwrap();
    builder.build()
}

// --- tokenizer ----------------------------------------------------------------

#[test]
fn test_tokenizer_kinds_and_comments() {
    let mut st = Tokenizer::new("# header\nk = Poly(-2.5e1, \"a\\\"b\", true); // tail\n[1]");
    let mut kinds = Vec::new();
    loop {
        let tok = st.next().unwrap();
        if tok.kind == TokenKind::Eof {
            break;
        }
        kinds.push((tok.kind, tok.lexeme, tok.line));
    }
    let just_kinds: Vec<TokenKind> = kinds.iter().map(|k| k.0).collect();
    assert_eq!(
        just_kinds,
        vec![
            TokenKind::Identifier,
            TokenKind::Equals,
            TokenKind::Identifier,
            TokenKind::LParen,
            TokenKind::Number,
            TokenKind::Comma,
            TokenKind::String,
            TokenKind::Comma,
            TokenKind::Bool,
            TokenKind::RParen,
            TokenKind::Semicolon,
            TokenKind::LBracket,
            TokenKind::Number,
            TokenKind::RBracket,
        ]
    );
    assert_eq!(kinds[4].1, "-2.5e1");
    assert_eq!(kinds[6].1, "a\"b", "escapes should be resolved");
    assert_eq!(kinds[0].2, 2, "comment line should be skipped");
    assert_eq!(kinds[11].2, 3);
}

#[test]
fn test_tokenizer_putback_and_peek_previous() {
    let mut st = Tokenizer::new("a b c");
    assert_eq!(st.next().unwrap().lexeme, "a");
    assert_eq!(st.next().unwrap().lexeme, "b");
    assert_eq!(st.peek_previous().unwrap().lexeme, "b");

    st.putback().unwrap();
    assert_eq!(st.peek_previous().unwrap().lexeme, "a", "previous survives a putback");
    assert_eq!(st.peek().unwrap().lexeme, "b");
    assert!(st.putback().is_err(), "only one level of pushback");

    assert_eq!(st.next().unwrap().lexeme, "b");
    assert_eq!(st.next().unwrap().lexeme, "c");
    assert_eq!(st.next().unwrap().kind, TokenKind::Eof);
}

#[test]
fn test_tokenizer_lex_errors() {
    let mut st = Tokenizer::new("\n\"never closed");
    match st.next() {
        Err(SpecError::Lex { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected lex error, got {:?}", other),
    }

    let mut st = Tokenizer::new("a @");
    st.next().unwrap();
    assert!(matches!(st.next(), Err(SpecError::Lex { line: 1, .. })));
}

// --- coercion -----------------------------------------------------------------

#[test]
fn test_coercion_rules() {
    assert!(matches!(
        coerce(Value::Int(2), &ValueType::Float, "x"),
        Ok(Value::Float(f)) if f == 2.0
    ));
    assert!(matches!(
        coerce(Value::Float(2.0), &ValueType::Int, "x"),
        Err(SpecError::TypeMismatch { .. })
    ));

    let widened = coerce(
        Value::List(vec![Value::Int(1), Value::Float(0.5)]),
        &ValueType::List(Box::new(ValueType::Float)),
        "xs",
    )
    .unwrap();
    assert_eq!(widened.to_string(), "[1.0, 0.5]");

    assert!(coerce(Value::List(vec![]), &ValueType::List(Box::new(ValueType::Str)), "xs").is_ok());
    match coerce(Value::Str("s".into()), &ValueType::Bool, "flag") {
        Err(SpecError::TypeMismatch { member, expected, got }) => {
            assert_eq!(member, "flag");
            assert_eq!(expected, "bool");
            assert_eq!(got, "string");
        }
        other => panic!("expected mismatch, got {:?}", other),
    }
}

// --- interpreter ----------------------------------------------------------

#[test]
fn test_parse_and_build_is_deterministic() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let spec = "KernelPerceptron(name=\"m\", kernel=Polynomial(3, 0.5), step=Decaying(rate=2, decay=0.1), max_retained=10)";
    let a = build_model(&registry, spec);
    let b = build_model(&registry, spec);
    assert_eq!(a.spec(), b.spec());
    assert_eq!(
        a.spec(),
        "KernelPerceptron(name=\"m\", kernel=Polynomial(degree=3, coefficient=0.5, scale=1.0), \
         update_predicate=Misranked(), step=Decaying(rate=2.0, decay=0.1), max_retained=10)"
    );

    // The canonical form rebuilds the same configuration.
    let c = build_model(&registry, &a.spec());
    assert_eq!(c.spec(), a.spec());
}

#[test]
fn test_unbound_variable_is_unknown_factory() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let mut env = Environment::new();
    let err = Interpreter::new(&registry)
        .eval("m = Linear(kernel=k)", &mut env)
        .unwrap_err();
    assert_eq!(
        err,
        SpecError::UnknownFactory {
            name: "k".to_string(),
            line: 1
        }
    );
    assert!(env.is_empty(), "no partial binding should remain");
}

#[test]
fn test_bound_objects_are_shared() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let mut env = Environment::new();
    let interp = Interpreter::new(&registry);
    interp.eval("k = Polynomial(degree=3);\nks = [k, k];", &mut env).unwrap();

    let k = env.component("k").unwrap().clone();
    match env.get("ks") {
        Some(Value::List(items)) => {
            for item in items {
                assert!(item.as_component().unwrap().ptr_eq(&k), "list should hold the bound kernel");
            }
        }
        other => panic!("expected list, got {:?}", other),
    }

    // A fresh call builds a distinct object.
    let fresh = interp.parse_and_build("Polynomial(degree=3)", &mut env).unwrap();
    assert!(!fresh.ptr_eq(&k));
}

#[test]
fn test_bare_identifier_resolution_order() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let interp = Interpreter::new(&registry);
    let mut env = Environment::new();

    // Unbound bare identifier is a zero-argument factory call.
    let dot = interp.parse_and_build("Dot", &mut env).unwrap();
    assert_eq!(dot.family(), "KernelFunction");
    assert_eq!(dot.type_name(), "Dot");

    // A variable of the same name shadows the factory.
    interp.eval("Dot = Rbf(0.5)", &mut env).unwrap();
    let shadowed = interp.parse_and_build("Dot", &mut env).unwrap();
    assert_eq!(shadowed.type_name(), "Rbf");

    // Identifier followed by '(' is always a factory call.
    let called = interp.parse_and_build("Dot()", &mut env).unwrap();
    assert_eq!(called.type_name(), "Dot");
}

#[test]
fn test_self_reference_is_cyclic() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let mut env = Environment::new();
    let err = Interpreter::new(&registry)
        .eval("ex = Executive(extractors=[Ngram(), ex])", &mut env)
        .unwrap_err();
    assert!(matches!(err, SpecError::CyclicSpec { ref name, .. } if name == "ex"), "{:?}", err);
    assert!(!env.is_bound("ex"));
}

#[test]
fn test_rebind_fails_and_keeps_original() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let interp = Interpreter::new(&registry);
    let mut env = Environment::new();
    interp.eval("k = Dot()", &mut env).unwrap();
    let err = interp.eval("k = Rbf()", &mut env).unwrap_err();
    assert!(matches!(err, SpecError::Rebind { .. }));
    assert_eq!(env.component("k").unwrap().type_name(), "Dot");
}

#[test]
fn test_eval_is_atomic() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let mut env = Environment::new();
    let err = Interpreter::new(&registry)
        .eval("a = Dot(); b = Rbf(gamma=1.0); c = Nope()", &mut env)
        .unwrap_err();
    assert!(matches!(err, SpecError::UnknownFactory { ref name, .. } if name == "Nope"));
    assert!(env.is_empty(), "earlier statements must not be committed");
}

#[test]
fn test_duplicate_parameter() {
    let registry = node_registry();
    let mut env = Environment::new();
    let interp = Interpreter::new(&registry);

    let err = interp.eval("A(x=B(y=1), x=B(y=2))", &mut env).unwrap_err();
    assert!(
        matches!(err, SpecError::DuplicateParameter { ref factory, ref member, .. } if factory == "A" && member == "x"),
        "{:?}",
        err
    );

    // Filled positionally, then named.
    let err = interp.eval("B(1, y=2)", &mut env).unwrap_err();
    assert!(matches!(err, SpecError::DuplicateParameter { .. }));

    let ok = interp.parse_and_build("A(B(7))", &mut env).unwrap();
    assert_eq!(ok.downcast::<NodeFamily>().unwrap().total(), 7);
}

#[test]
fn test_positional_parameters() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let interp = Interpreter::new(&registry);
    let mut env = Environment::new();

    let positional = interp.parse_and_build("Polynomial(3, 0.5)", &mut env).unwrap();
    let named = interp.parse_and_build("Polynomial(coefficient=0.5, degree=3)", &mut env).unwrap();
    let a = fv(&[(0, 1.0), (1, 2.0)]);
    let b = fv(&[(0, 0.5), (1, 1.0)]);
    let kp = positional.downcast::<KernelFamily>().unwrap();
    let kn = named.downcast::<KernelFamily>().unwrap();
    assert_eq!(kp.apply(&a, &b), kn.apply(&a, &b));
    assert_eq!(kp.apply(&a, &b), 3.0f64.powi(3), "(2.5 + 0.5)^3");

    assert!(matches!(interp.eval("Dot(1)", &mut env), Err(SpecError::Parse { .. })));
    assert!(matches!(interp.eval("Polynomial(degree=3, 0.5)", &mut env), Err(SpecError::Parse { .. })));
    assert!(interp.eval("Polynomial(3, 0.5,)", &mut env).is_ok(), "trailing comma accepted");
}

#[test]
fn test_member_errors() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let interp = Interpreter::new(&registry);
    let mut env = Environment::new();

    assert!(matches!(
        interp.eval("Polynomial(degree=\"x\")", &mut env),
        Err(SpecError::TypeMismatch { ref member, .. }) if member == "degree"
    ));
    assert!(matches!(
        interp.eval("Polynomial(degree=2.5)", &mut env),
        Err(SpecError::TypeMismatch { .. })
    ));
    assert!(matches!(
        interp.eval("Linear(kernel=Misranked())", &mut env),
        Err(SpecError::TypeMismatch { ref expected, ref got, .. })
            if expected == "KernelFunction" && got == "UpdatePredicate"
    ));
    assert!(matches!(
        interp.eval("Rbf(sigma=1.0)", &mut env),
        Err(SpecError::UnknownMember { ref member, .. }) if member == "sigma"
    ));
    assert!(matches!(
        interp.eval("Executive()", &mut env),
        Err(SpecError::MissingMember { ref member, .. }) if member == "extractors"
    ));
    assert!(matches!(
        interp.eval("Polynomial(degree=0)", &mut env),
        Err(SpecError::InvalidConfiguration { .. })
    ));
    assert!(matches!(
        interp.parse_and_build("3", &mut env),
        Err(SpecError::NotAComponent { .. })
    ));

    // int widens into a float member
    assert!(interp.eval("Rbf(gamma=2)", &mut env).is_ok());
}

#[test]
fn test_primitive_bindings_and_display() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let interp = Interpreter::new(&registry);
    let mut env = Environment::new();

    let last = interp.eval("d = 4; name = \"big\"; m = Linear(name=name, kernel=Polynomial(degree=d))", &mut env).unwrap();
    assert!(matches!(last, Evaluation::Bound(ref n) if n == "m"));
    assert_eq!(env.len(), 3);

    let model = env
        .component("m")
        .unwrap()
        .clone()
        .to_owned_object::<ModelFamily>()
        .unwrap();
    assert_eq!(model.name(), "big");
    assert!(model.spec().contains("Polynomial(degree=4"));

    let shown = env.to_string();
    assert!(shown.contains("int d = 4;"), "{}", shown);
    assert!(shown.contains("string name = \"big\";"), "{}", shown);
}

#[test]
fn test_registry_describe_and_duplicates() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let described = registry.describe();
    assert!(described.contains("Factory<KernelFunction> can construct:"));
    assert!(described.contains("\tPolynomial(degree?: int, coefficient?: float, scale?: float)"));
    assert!(described.contains("\tExecutive(extractors: FeatureExtractor[])"));

    let families = registry.registered();
    assert_eq!(families["Model"], vec!["KernelPerceptron", "Linear", "PerceptronModel"]);

    let mut builder = FactoryRegistry::builder();
    builder.register::<Rbf>("Rbf").unwrap();
    assert_eq!(
        builder.register::<Polynomial>("Rbf").err(),
        Some(SpecError::DuplicateFactory {
            name: "Rbf".to_string()
        })
    );
}

#[test]
fn test_builtin_registration_reports_conflicts() {
    assert!(FactoryRegistry::with_builtins().is_ok());
    let mut builder = FactoryRegistry::builder();
    crate::registry::register_builtins(&mut builder).unwrap();
    match crate::registry::register_builtins(&mut builder) {
        Err(SpecError::DuplicateFactory { name }) => assert_eq!(name, "Dot"),
        other => panic!("expected duplicate factory, got {:?}", other),
    }
}

#[test]
fn test_non_finite_literals_are_rejected() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let mut env = Environment::new();
    match Interpreter::new(&registry).parse_and_build("Linear(kernel=Polynomial(degree=2, coefficient=1e999))", &mut env) {
        Err(SpecError::Lex { line, .. }) => assert_eq!(line, 1),
        other => panic!("expected lex error, got {:?}", other),
    }
    assert!(env.is_empty());

    for kernel in [
        Polynomial { coefficient: f64::INFINITY, ..Polynomial::default() },
        Polynomial { scale: f64::NAN, ..Polynomial::default() },
    ] {
        assert!(matches!(kernel.finish(), Err(SpecError::InvalidConfiguration { .. })));
    }

    // Large but finite values survive a save and reload.
    let codec = JsonModelCodec::new(&registry);
    let model = build_model(&registry, "Linear(kernel=Polynomial(2, 1e300))");
    let restored = codec.read(&codec.write(&model).unwrap()).unwrap();
    assert_eq!(restored.spec(), model.spec());
}

// --- kernels and update policy ---------------------------------------------

#[test]
fn test_kernel_values() {
    let a = fv(&[(0, 1.0), (1, 2.0)]);
    let b = fv(&[(1, 3.0), (2, 4.0)]);
    assert_eq!(DotProduct.apply(&a, &b), 6.0);

    let poly = Polynomial {
        degree: 2,
        coefficient: 1.0,
        scale: 0.5,
    };
    assert_eq!(poly.apply(&a, &b), 16.0);

    let rbf = Rbf { gamma: 0.1 };
    // |a-b|^2 = 1 + 1 + 16
    assert!((rbf.apply(&a, &b) - (-1.8f64).exp()).abs() < 1e-12);
    assert_eq!(rbf.apply(&a, &a), 1.0);
}

#[test]
fn test_step_schedules() {
    let ctx = StepContext {
        time: Time {
            epoch: 1,
            index: 5,
            absolute_index: 5,
        },
        gold_score: 0.0,
        competitor_score: 1.0,
        gold_loss: 0.0,
        competitor_loss: 1.0,
        distance_sq: 4.0,
    };
    assert_eq!(Fixed { rate: 0.25 }.step_size(&ctx), 0.25);
    assert_eq!(Decaying { rate: 1.0, decay: 0.5 }.step_size(&ctx), 1.0 / 3.0);
    assert_eq!(Mira { clip: 10.0 }.step_size(&ctx), 0.5, "(1 + 1) / 4");
    assert_eq!(Mira { clip: 0.1 }.step_size(&ctx), 0.1, "clipped");

    let signal = UpdateSignal {
        top_is_reference: true,
        gold_score: 1.0,
        competitor_score: 0.5,
    };
    assert!(!Misranked.need_to_update(&signal));
    assert!(Margin { margin: 1.0 }.need_to_update(&signal));
    assert!(!Margin { margin: 0.5 }.need_to_update(&signal));
}

// --- training -------------------------------------------------------------

#[test]
fn test_linear_dot_scenario() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let mut model = build_model(&registry, "Linear(kernel=Dot())");
    let f1 = fv(&[(0, 1.0)]);
    let f2 = fv(&[(1, 1.0)]);

    // Make f2 look good first.
    let mut warmup = set("w", &[(&[(0, 1.0)], false), (&[(1, 1.0)], true)]);
    model.train_on_example(&mut warmup).unwrap();
    assert!(model.score_with(&f2, ScoreMode::Raw) > model.score_with(&f1, ScoreMode::Raw));

    let mut example = set("e", &[(&[(0, 1.0)], true), (&[(1, 1.0)], false)]);
    let outcome = model.train_on_example(&mut example).unwrap();
    assert!(matches!(outcome, ExampleOutcome::Updated { step, .. } if step == 1.0));
    assert!(model.score_with(&f1, ScoreMode::Raw) >= model.score_with(&f2, ScoreMode::Raw));

    let order = model.rank(&example);
    model.checkpoint();
    assert_eq!(model.phase(), Phase::Idle);
    assert_eq!(order.len(), 2);
}

#[test]
fn test_no_reference_advances_time_only() {
    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let mut seed = set("seed", &[(&[(0, 1.0)], false), (&[(1, 1.0)], true)]);
    model.train_on_example(&mut seed).unwrap();
    let before = model.weights().clone();
    let t = model.time();

    let mut orphan = set("orphan", &[(&[(0, 1.0)], false), (&[(2, 1.0)], false)]);
    assert_eq!(model.train_on_example(&mut orphan).unwrap(), ExampleOutcome::NoReference);
    assert_eq!(model.time().absolute_index, t.absolute_index + 1);
    assert_eq!(model.weights(), &before);
}

#[test]
fn test_empty_candidate_set_is_fatal() {
    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let mut empty = CandidateSet::new("empty", vec![]);
    match model.train_on_example(&mut empty) {
        Err(TrainError::EmptyCandidateSet { key, absolute_index }) => {
            assert_eq!(key, "empty");
            assert_eq!(absolute_index, 0);
        }
        other => panic!("expected EmptyCandidateSet, got {:?}", other),
    }
    assert_eq!(model.time(), Time::new(), "time must not advance");

    // Inside train(), the epoch aborts but averages are materialized.
    let source = InMemorySource::new(vec![toy_corpus()[0].clone(), CandidateSet::new("bad", vec![])]);
    let err = model.train(&source, 2, &TrainOptions::default()).unwrap_err();
    assert!(matches!(err, TrainError::EmptyCandidateSet { absolute_index: 1, .. }));
    assert_eq!(model.phase(), Phase::Idle);
    let query = fv(&[(1, 1.0)]);
    assert_eq!(model.score(&query), model.score_with(&query, ScoreMode::Raw), "averaged after one example equals raw");
}

#[test]
fn test_absolute_index_counts_examples_across_epochs() {
    let source = InMemorySource::new(toy_corpus());
    let mut a = PerceptronModel::linear("a", Arc::new(DotProduct));
    let report = a.train(&source, 3, &TrainOptions::default()).unwrap();
    assert_eq!(report.epochs_completed, 3);
    assert_eq!(a.time().absolute_index, 12);
    assert_eq!(a.time().epoch, 3);

    let mut b = PerceptronModel::linear("b", Arc::new(DotProduct));
    b.train(&source, 1, &TrainOptions::default()).unwrap();
    b.train(&source, 2, &TrainOptions::default()).unwrap();
    assert_eq!(b.time(), a.time());
    assert_eq!(b.weights(), a.weights(), "epoch split must not change the result");
}

#[test]
fn test_zero_epochs_is_a_no_op() {
    let source = InMemorySource::new(toy_corpus());
    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    model.train(&source, 1, &TrainOptions::default()).unwrap();
    let (time, weights) = (model.time(), model.weights().clone());

    let report = model.train(&source, 0, &TrainOptions::default()).unwrap();
    assert_eq!(report, TrainingReport::default());
    assert_eq!(model.time(), time);
    assert_eq!(model.weights(), &weights);
}

#[test]
fn test_averaged_weights_match_hand_computation() {
    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    // T=1: tie goes to index 0 (non-reference) -> w = {0:-1, 1:+1}
    let mut first = set("1", &[(&[(0, 1.0)], false), (&[(1, 1.0)], true)]);
    // T=2: f1 scores higher but is wrong -> w = {0:0, 1:0}
    let mut second = set("2", &[(&[(0, 1.0)], true), (&[(1, 1.0)], false)]);
    model.train_on_example(&mut first).unwrap();
    model.train_on_example(&mut second).unwrap();
    model.checkpoint();

    let f0 = fv(&[(0, 1.0)]);
    let f1 = fv(&[(1, 1.0)]);
    assert_eq!(model.score_with(&f0, ScoreMode::Raw), 0.0);
    assert_eq!(model.score(&f0), -0.5);
    assert_eq!(model.score(&f1), 0.5);

    let mut kernel = PerceptronModel::kernelized("k", Arc::new(DotProduct), None);
    kernel.train_on_example(&mut first).unwrap();
    kernel.train_on_example(&mut second).unwrap();
    kernel.checkpoint();
    assert_eq!(kernel.score(&f0), -0.5);
    assert_eq!(kernel.score(&f1), 0.5);
}

#[test]
fn test_kernelized_dot_matches_linear() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let source = InMemorySource::new(toy_corpus());
    let mut linear = build_model(&registry, "Linear(kernel=Dot(), step=Fixed(0.5))");
    let mut kernel = build_model(&registry, "KernelPerceptron(kernel=Dot(), step=Fixed(0.5))");
    let lr = linear.train(&source, 4, &TrainOptions::default()).unwrap();
    let kr = kernel.train(&source, 4, &TrainOptions::default()).unwrap();
    assert_eq!(lr.updates, kr.updates);

    for query in [fv(&[(0, 1.0)]), fv(&[(1, 1.0), (2, 1.0)]), fv(&[(3, 2.0), (0, -1.0)])] {
        for mode in [ScoreMode::Raw, ScoreMode::Averaged] {
            let l = linear.score_with(&query, mode);
            let k = kernel.score_with(&query, mode);
            assert!((l - k).abs() < 1e-9, "{:?}: linear {} vs kernel {}", mode, l, k);
        }
    }
}

#[test]
fn test_retained_set_overflow_warns() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let mut model = build_model(&registry, "KernelPerceptron(kernel=Polynomial(2), max_retained=2)");
    let source = InMemorySource::new(vec![
        set("a", &[(&[(0, 1.0)], false), (&[(1, 1.0)], true)]),
        set("b", &[(&[(2, 3.0)], false), (&[(3, 1.0)], true)]),
    ]);
    let report = model.train(&source, 1, &TrainOptions::default()).unwrap();
    assert_eq!(report.updates, 2);
    assert_eq!(
        report.warnings,
        vec![TrainingWarning::RetainedSetOverflow {
            epoch: 1,
            evicted: 2,
            capacity: 2
        }]
    );
    match model.weights() {
        Weights::Kernel(support) => assert_eq!(support.len(), 2),
        other => panic!("expected kernel weights, got {:?}", other.variant()),
    }

    assert!(matches!(
        Interpreter::new(&registry).eval("KernelPerceptron(max_retained=1)", &mut Environment::new()),
        Err(SpecError::InvalidConfiguration { .. })
    ));
}

#[test]
fn test_margin_predicate_updates_correct_rankings() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let mut strict = build_model(&registry, "Linear(update_predicate=Misranked())");
    let mut margin = build_model(&registry, "Linear(update_predicate=Margin(margin=1.0))");
    let example = set("m", &[(&[(0, 1.0)], true), (&[(1, 1.0)], false)]);

    assert_eq!(strict.train_on_example(&mut example.clone()).unwrap(), ExampleOutcome::Correct);
    assert!(matches!(
        margin.train_on_example(&mut example.clone()).unwrap(),
        ExampleOutcome::Updated { .. }
    ));
}

#[test]
fn test_score_mode_follows_phase() {
    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let query = fv(&[(1, 1.0)]);
    let mut first = set("1", &[(&[(0, 1.0)], false), (&[(1, 1.0)], true)]);
    let mut second = set("2", &[(&[(2, 1.0)], false), (&[(3, 1.0)], true)]);
    model.train_on_example(&mut first).unwrap();
    model.train_on_example(&mut second).unwrap();
    assert_eq!(model.phase(), Phase::TrainingEpoch);
    assert_eq!(model.score(&query), 1.0, "raw while training");
    assert_eq!(model.score_with(&query, ScoreMode::Averaged), 0.0, "not yet materialized");

    model.checkpoint();
    assert_eq!(model.score(&query), 1.0, "held for both examples");
    let late = fv(&[(3, 1.0)]);
    assert_eq!(model.score(&late), 0.5);
}

#[test]
fn test_devtest_early_stopping() {
    let train = InMemorySource::new(toy_corpus());
    // Constant devtest loss never improves after the first epoch.
    let mut lone = set("d", &[(&[(0, 1.0)], true)]);
    lone.candidates[0].loss = 0.0;
    let devtest = InMemorySource::new(vec![lone]);

    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let options = TrainOptions {
        devtest: Some(&devtest),
        max_epochs_in_decline: 2,
        ..TrainOptions::default()
    };
    let report = model.train(&train, 10, &options).unwrap();
    assert!(report.converged);
    assert_eq!(report.epochs_completed, 3);
    assert_eq!(report.devtest.len(), 3);
    assert_eq!(model.phase(), Phase::Converged);
    assert_eq!(model.stats().best_epoch, Some(1));

    // min_epochs holds training open.
    let mut patient = PerceptronModel::linear("p", Arc::new(DotProduct));
    let options = TrainOptions {
        devtest: Some(&devtest),
        max_epochs_in_decline: 2,
        min_epochs: 5,
        ..TrainOptions::default()
    };
    let report = patient.train(&train, 10, &options).unwrap();
    assert_eq!(report.epochs_completed, 5);
}

/// Two sets that undo each other's update, so averages never improve after epoch 1
fn seesaw_corpus() -> Vec<CandidateSet> {
    vec![
        set("up", &[(&[(1, 1.0)], false), (&[(0, 1.0)], true)]),
        set("down", &[(&[(0, 1.0)], false), (&[(1, 1.0)], true)]),
    ]
}

#[test]
fn test_best_devtest_weights_are_restored() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let train = InMemorySource::new(seesaw_corpus());
    let devtest = InMemorySource::new(vec![set("d", &[(&[(0, 1.0)], false), (&[(1, 1.0)], true)])]);
    let options = TrainOptions {
        devtest: Some(&devtest),
        ..TrainOptions::default()
    };

    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let report = model.train(&train, 3, &options).unwrap();
    assert_eq!(report.epochs_completed, 3);
    assert_eq!(model.stats().best_epoch, Some(1));
    assert_eq!(model.time().epoch, 3, "the clock keeps running");

    let mut one_epoch = PerceptronModel::linear("m", Arc::new(DotProduct));
    one_epoch.train(&train, 1, &TrainOptions::default()).unwrap();
    let mut three_epochs = PerceptronModel::linear("m", Arc::new(DotProduct));
    three_epochs.train(&train, 3, &TrainOptions::default()).unwrap();

    assert_eq!(model.weights(), one_epoch.weights());
    assert_ne!(model.weights(), three_epochs.weights());
    assert_eq!(model.best_weights(), Some(one_epoch.weights()));
    for query in [fv(&[(0, 1.0)]), fv(&[(1, 1.0)])] {
        assert_eq!(
            model.score_with(&query, ScoreMode::Averaged).to_bits(),
            one_epoch.score_with(&query, ScoreMode::Averaged).to_bits()
        );
    }

    let codec = JsonModelCodec::new(&registry);
    let restored = codec.read(&codec.write(&model).unwrap()).unwrap();
    assert_eq!(restored.weights(), model.weights());
    assert_eq!(restored.best_weights(), model.best_weights());
}

#[test]
fn test_min_epochs_counts_epochs_before_resume() {
    let train = InMemorySource::new(toy_corpus());
    let lone = set("d", &[(&[(0, 1.0)], true)]);
    let devtest = InMemorySource::new(vec![lone]);

    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    model.train(&train, 3, &TrainOptions::default()).unwrap();

    let options = TrainOptions {
        devtest: Some(&devtest),
        min_epochs: 3,
        max_epochs_in_decline: 1,
        ..TrainOptions::default()
    };
    let report = model.train(&train, 10, &options).unwrap();
    assert!(report.converged);
    assert_eq!(report.epochs_completed, 2, "epoch 4 sets the best loss, epoch 5 declines");
    assert_eq!(model.time().epoch, 5);
}

#[test]
fn test_weighted_devtest_loss() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let text = concat!(
        r#"{"key":"a","loss_weight":3.0,"candidates":[{"features":{"x":1.0}},{"features":{"y":1.0},"reference":true}]}"#,
        "\n",
        r#"{"key":"b","candidates":[{"features":{"y":1.0},"reference":true},{"features":{"x":1.0}}]}"#,
        "\n"
    );
    let devtest = TextSource(text.to_string());

    let weighted = build_model(&registry, "Linear(name=\"w\", use_weighted_loss=true)");
    assert!(weighted.use_weighted_loss());
    assert!(weighted.spec().contains("use_weighted_loss=true"));
    let report = weighted.evaluate(&devtest).unwrap();
    assert_eq!(report.num_sets, 2);
    assert_eq!(report.num_errors, 1);
    assert_eq!(report.total_weight, 4.0);
    assert_eq!(report.loss, 0.75);
    assert_eq!(report.baseline_loss, 0.75);
    assert_eq!(report.oracle_loss, 0.0);

    let plain = PerceptronModel::linear("p", Arc::new(DotProduct));
    assert!(!plain.spec().contains("use_weighted_loss"));
    let report = plain.evaluate(&devtest).unwrap();
    assert_eq!(report.total_weight, 2.0);
    assert_eq!(report.loss, 0.5);
}

#[test]
fn test_cancellation_between_epochs() {
    let source = InMemorySource::new(toy_corpus());
    let cancel = AtomicBool::new(true);
    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let options = TrainOptions {
        cancel: Some(&cancel),
        ..TrainOptions::default()
    };
    let report = model.train(&source, 5, &options).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.epochs_completed, 0);
    assert_eq!(model.time(), Time::new());
}

#[test]
fn test_read_error_policy() {
    let text = concat!(
        r#"{"key":"a","candidates":[{"features":{"x":1.0}},{"features":{"y":1.0},"reference":true}]}"#,
        "\n{not json\n",
        r#"{"key":"b","candidates":[{"features":{"x":1.0},"reference":true},{"features":{"y":1.0}}]}"#,
        "\n"
    );
    let source = TextSource(text.to_string());

    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    match model.train(&source, 1, &TrainOptions::default()) {
        Err(TrainError::Read(ReadError::Malformed { line, .. })) => assert_eq!(line, 2),
        other => panic!("expected malformed record, got {:?}", other),
    }

    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let options = TrainOptions {
        read_error_policy: ReadErrorPolicy::Skip,
        ..TrainOptions::default()
    };
    let report = model.train(&source, 2, &options).unwrap();
    assert_eq!(report.skipped_records, 2);
    assert_eq!(report.examples, 4);
    assert_eq!(model.symbols().len(), 2);
}

#[test]
fn test_evaluate_reports_losses() {
    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let source = InMemorySource::new(toy_corpus());
    model.train(&source, 5, &TrainOptions::default()).unwrap();

    let mut first_wrong = set("e", &[(&[(9, 1.0)], false), (&[(8, 1.0)], true)]);
    first_wrong.candidates[0].loss = 0.75;
    let report = model.evaluate(&InMemorySource::new(vec![first_wrong])).unwrap();
    assert_eq!(report.num_sets, 1);
    // Unseen features tie at zero, so the first candidate wins.
    assert_eq!(report.num_errors, 1);
    assert_eq!(report.loss, 0.75);
    assert_eq!(report.baseline_loss, 0.75);
    assert_eq!(report.oracle_loss, 0.0);
}

#[test]
fn test_compactify_feature_ids() {
    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let mut example = named_set(
        "c",
        &[
            (&[("shared", 1.0), ("bad", 1.0)], false),
            (&[("shared", 1.0), ("good", 1.0)], true),
        ],
    );
    model.train_on_example(&mut example).unwrap();
    model.checkpoint();
    assert_eq!(model.symbols().len(), 3);

    let query = named_set("p", &[(&[("good", 1.0), ("bad", 0.5)], true)]);
    let before = model.score_candidate(&query.candidates[0], ScoreMode::Averaged);

    let mapping = model.compactify_feature_ids();
    assert_eq!(mapping.len(), 2, "\"shared\" never received weight");
    assert_eq!(model.symbols().len(), 2);
    assert_eq!(model.symbols().get("shared"), None);
    assert_eq!(model.score_candidate(&query.candidates[0], ScoreMode::Averaged), before);
    assert_eq!(before, 0.5);
}

// --- features and readers -------------------------------------------------

#[test]
fn test_ngram_extraction() {
    let mut out = Vec::new();
    NgramExtractor::default().extract("A b", &mut out);
    let names: Vec<&str> = out.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["ng{<s>,a}", "ng{a}", "ng{a,b}", "ng{b}", "ng{b,</s>}"]);
}

#[test]
fn test_executive_extractor_from_spec() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let component = Interpreter::new(&registry)
        .parse_and_build("Executive([Ngram(n=1, prefix=\"u\"), TokenCount()])", &mut Environment::new())
        .unwrap();
    let extractor = component.downcast::<FeatureExtractorFamily>().unwrap();

    let mut texts = CandidateSet::new(
        "t",
        vec![
            Candidate::new(FeatureVector::new(), true).with_text("x y"),
            Candidate::new(FeatureVector::new(), false),
        ],
    );
    texts.extract_features(extractor.as_ref());
    let first: BTreeMap<String, f64> = texts.candidates[0].symbolic_features.iter().cloned().collect();
    assert_eq!(first.get("u{x}"), Some(&1.0));
    assert_eq!(first.get("u{y}"), Some(&1.0));
    assert_eq!(first.get("num_tokens"), Some(&2.0));
    assert_eq!(first.len(), 3);
    assert!(texts.candidates[1].symbolic_features.is_empty(), "no text, no features");
}

#[test]
fn test_extracting_source_feeds_training() {
    let sets = vec![CandidateSet::new(
        "t",
        vec![
            Candidate::new(FeatureVector::new(), false).with_text("the wrong one"),
            Candidate::new(FeatureVector::new(), true).with_text("the right one"),
        ],
    )];
    let source = ExtractingSource::new(InMemorySource::new(sets), Arc::new(NgramExtractor::default()));
    let mut model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let report = model.train(&source, 1, &TrainOptions::default()).unwrap();
    assert_eq!(report.updates, 1);
    assert!(model.symbols().get("ng{right}").is_some());
    assert!(model.symbols().get("ng{the}").is_some());
}

#[test]
fn test_json_lines_reader() {
    let text = concat!(
        "\n",
        r#"{"key":"k1","reference":"gold text","candidates":[{"features":{"a":1.5},"reference":true},{"features":{"b":2.0},"score":-3.0,"text":"hyp"},{"features":{}}]}"#,
        "\n\n",
        r#"{"key":"k2","candidates":[{"features":{"a":1.0},"loss":0.25}]}"#,
        "\n",
        r#"{"key":"k3"}"#,
        "\n"
    );
    let mut reader = JsonLinesReader::new(Cursor::new(text)).with_max_candidates(Some(2));

    let first = reader.next().unwrap().unwrap();
    assert_eq!(first.training_key, "k1");
    assert_eq!(first.reference_text.as_deref(), Some("gold text"));
    assert_eq!(first.len(), 2, "truncated to max_candidates");
    assert_eq!(first.candidates[0].loss, 0.0);
    assert_eq!(first.candidates[1].loss, 1.0);
    assert_eq!(first.candidates[1].raw_score, Some(-3.0));
    assert_eq!(first.candidates[1].text.as_deref(), Some("hyp"));
    assert_eq!(first.candidates[0].symbolic_features, vec![("a".to_string(), 1.5)]);

    let second = reader.next().unwrap().unwrap();
    assert_eq!(second.candidates[0].loss, 0.25);
    assert_eq!(second.num_references(), 0);

    match reader.next() {
        Some(Err(ReadError::Malformed { line, .. })) => assert_eq!(line, 5),
        other => panic!("expected malformed record, got {:?}", other),
    }
    assert!(reader.next().is_none());
    assert_eq!(reader.total_num_read(), 2);
}

#[test]
fn test_json_lines_writer_round_trip() {
    let mut symbols = Symbols::new();
    let mut original = named_set("w", &[(&[("p", 1.0)], true), (&[("q", 2.0), ("p", -1.0)], false)]);
    original.reference_text = Some("ref".to_string());
    original.loss_weight = 2.5;
    original.compile_features(&mut symbols);

    let mut writer = JsonLinesWriter::new(Vec::new());
    writer.write(&original, Some(&symbols)).unwrap();
    assert_eq!(writer.num_written(), 1);
    let bytes = writer.into_inner();

    let back: Vec<CandidateSet> = JsonLinesReader::new(Cursor::new(bytes))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(back.len(), 1);
    let mut restored = back[0].clone();
    restored.compile_features(&mut symbols);
    assert_eq!(restored, original);
}

#[test]
fn test_reader_counts_undecodable_lines() {
    let mut bytes = br#"{"key":"ok","candidates":[{"features":{"a":1.0},"reference":true}]}"#.to_vec();
    bytes.extend_from_slice(b"\n\xff\xfe\nnot json\n");
    let mut reader = JsonLinesReader::new(Cursor::new(bytes));

    assert_eq!(reader.next().unwrap().unwrap().training_key, "ok");
    match reader.next() {
        Some(Err(ReadError::Malformed { line, message })) => {
            assert_eq!(line, 2);
            assert!(message.contains("UTF-8"), "{}", message);
        }
        other => panic!("expected undecodable line, got {:?}", other),
    }
    match reader.next() {
        Some(Err(ReadError::Malformed { line, .. })) => assert_eq!(line, 3),
        other => panic!("expected malformed record, got {:?}", other),
    }
    assert!(reader.next().is_none());
}

/// Sink whose every write fails
struct ClosedSink;

impl std::io::Write for ClosedSink {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_writer_failures_are_io_errors() {
    let mut writer = JsonLinesWriter::new(ClosedSink);
    let example = set("s", &[(&[(0, 1.0)], true)]);
    assert!(matches!(writer.write(&example, None), Err(ReadError::Io(_))));
    assert_eq!(writer.num_written(), 0);
}

// --- persistence ------------------------------------------------------------

#[test]
fn test_codec_round_trip_is_bit_exact() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let codec = JsonModelCodec::new(&registry);
    let source = InMemorySource::new(toy_corpus());

    for spec in [
        "Linear(name=\"lin\", step=Fixed(0.3))",
        "KernelPerceptron(name=\"poly\", kernel=Polynomial(3, 0.1), step=Decaying(0.7, 0.01))",
    ] {
        let mut model = build_model(&registry, spec);
        model.train(&source, 3, &TrainOptions::default()).unwrap();
        let restored = codec.read(&codec.write(&model).unwrap()).unwrap();

        assert_eq!(restored.spec(), model.spec());
        assert_eq!(restored.time(), model.time());
        assert_eq!(restored.phase(), model.phase());
        assert_eq!(restored.weights(), model.weights());
        for query in [fv(&[(0, 0.1)]), fv(&[(1, 1.0 / 3.0), (3, 7.0)])] {
            for mode in [ScoreMode::Raw, ScoreMode::Averaged] {
                assert_eq!(
                    restored.score_with(&query, mode).to_bits(),
                    model.score_with(&query, mode).to_bits(),
                    "{} {:?}",
                    spec,
                    mode
                );
            }
        }
    }
}

#[test]
fn test_resume_continues_without_discontinuity() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let codec = JsonModelCodec::new(&registry);
    let source = InMemorySource::new(toy_corpus());
    let spec = "Linear(name=\"r\", step=Decaying(rate=1.0, decay=0.2))";

    let mut straight = build_model(&registry, spec);
    straight.train(&source, 4, &TrainOptions::default()).unwrap();

    let mut first_half = build_model(&registry, spec);
    first_half.train(&source, 2, &TrainOptions::default()).unwrap();
    let mut resumed = codec.read(&codec.write(&first_half).unwrap()).unwrap();
    resumed.train(&source, 2, &TrainOptions::default()).unwrap();

    assert_eq!(resumed.time(), straight.time());
    assert_eq!(resumed.weights(), straight.weights());
    assert_eq!(resumed.stats(), straight.stats());
}

#[test]
fn test_codec_rejects_mismatched_state() {
    let registry = FactoryRegistry::with_builtins().unwrap();
    let codec = JsonModelCodec::new(&registry);
    let model = PerceptronModel::linear("m", Arc::new(DotProduct));
    let text = String::from_utf8(codec.write(&model).unwrap()).unwrap();

    let wrong_format = text.replace(crate::codec::FORMAT, "reranker-model/0");
    assert!(matches!(codec.read(wrong_format.as_bytes()), Err(CodecError::Format(_))));

    let wrong_variant = text.replace("\"spec\":\"Linear(", "\"spec\":\"KernelPerceptron(");
    assert!(matches!(codec.read(wrong_variant.as_bytes()), Err(CodecError::Format(_))));

    let bad_spec = text.replace("\"spec\":\"Linear(", "\"spec\":\"Lineer(");
    assert!(matches!(codec.read(bad_spec.as_bytes()), Err(CodecError::Spec(_))));

    assert!(matches!(codec.read(b"{"), Err(CodecError::Json(_))));
}

// --- configuration ----------------------------------------------------------

#[test]
fn test_config_overrides() {
    let mut config = TrainingConfig::default();
    assert_eq!(config.epochs, 10);
    assert_eq!(config.read_error_policy, ReadErrorPolicy::Abort);

    let env: BTreeMap<&str, &str> = [
        ("RERANKER_EPOCHS", "3"),
        ("RERANKER_MAX_EPOCHS_IN_DECLINE", "2"),
        ("RERANKER_READ_ERROR_POLICY", "Skip"),
        ("RERANKER_MAX_CANDIDATES", "50"),
        ("RERANKER_MIN_EPOCHS", "lots"),
    ]
    .into_iter()
    .collect();
    config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.epochs, 3);
    assert_eq!(config.max_epochs_in_decline, 2);
    assert_eq!(config.read_error_policy, ReadErrorPolicy::Skip);
    assert_eq!(config.max_candidates, Some(50));
    assert_eq!(config.min_epochs, 0, "unparsable values are ignored");

    let options = config.train_options();
    assert_eq!(options.max_epochs_in_decline, 2);
    assert!(options.devtest.is_none());
}

#[test]
fn test_config_file() {
    let path = std::env::temp_dir().join(format!("reranker-config-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"epochs": 7, "read_error_policy": "skip"}"#).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let config: TrainingConfig = serde_json::from_str(&text).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.epochs, 7);
    assert_eq!(config.read_error_policy, ReadErrorPolicy::Skip);
    assert_eq!(config.reporting_interval, 1000, "missing fields keep defaults");

    assert!(TrainingConfig::load(Some(std::path::Path::new("/nonexistent/reranker.json"))).is_err());
}

#[test]
fn test_zero_candidate_limit_means_unbounded() {
    let path = std::env::temp_dir().join(format!("reranker-limit-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"max_candidates": 0}"#).unwrap();
    let config = TrainingConfig::load(Some(&path));
    std::fs::remove_file(&path).unwrap();
    assert_eq!(config.unwrap().max_candidates, None);

    let mut config = TrainingConfig {
        max_candidates: Some(0),
        ..TrainingConfig::default()
    };
    config.normalize();
    assert_eq!(config.max_candidates, None);
}
