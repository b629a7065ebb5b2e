use covenant::{
    Compiler, CompilerError, CompilerOptions, DocumentationType, SourceLocation, Span, Stage,
    StateError,
};
use pretty_assertions::assert_eq;

/// Set `RUST_LOG=covenant=debug` to see the phase logs of a failing test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn compiler() -> Compiler {
    init_tracing();
    Compiler::with_options(CompilerOptions::new().with_standard_sources(false))
}

fn not_found(name: &str) -> CompilerError {
    CompilerError::State(StateError::ContractNotFound(name.to_string()))
}

#[test]
fn test_single_empty_contract() {
    let mut compiler = compiler();
    compiler.add_source("A", "contract A {}", false);
    compiler.compile().unwrap();

    assert_eq!(compiler.contract_names().unwrap(), vec!["A"]);
    assert!(!compiler.object("A").unwrap().is_empty());
    assert!(!compiler.runtime_object("A").unwrap().is_empty());
    assert_eq!(compiler.object("B").unwrap_err(), not_found("B"));
    assert!(compiler.object("B").unwrap_err().to_string().contains("not found"));
}

#[test]
fn test_missing_import_fails_before_resolution() {
    let text = "import \"Y\";\ncontract X is Y {}";
    let mut compiler = compiler();
    compiler.add_source("X", text, false);

    let err = compiler.compile().unwrap_err();
    assert!(err.is_unresolved_import(), "unexpected error: {err}");
    assert_eq!(
        err.location(),
        Some(&SourceLocation::new("X", Span::new(0, 11)))
    );
    assert_eq!(compiler.stage(), Stage::Failed);
}

#[test]
fn test_unimplemented_contract_has_no_artifacts() {
    let mut compiler = compiler();
    let source = "contract A { function f() public; } \
                  contract B { function g() public returns (uint256) { return 1; } }";
    compiler.add_source("a", source, false);
    compiler.compile().unwrap();

    assert_eq!(compiler.contract_names().unwrap(), vec!["A", "B"]);
    assert!(compiler.object("A").unwrap().is_empty());
    assert!(compiler.runtime_object("A").unwrap().is_empty());
    assert_eq!(compiler.assembly_items("A").unwrap(), None);
    assert_eq!(compiler.contract_code_hash("A").unwrap(), [0; 32]);

    let mut listing = String::new();
    compiler.stream_assembly(&mut listing, "A").unwrap();
    assert_eq!(listing, "Contract not fully implemented\n");

    assert!(!compiler.object("B").unwrap().is_empty());
    assert!(compiler.assembly_items("B").unwrap().is_some());
    assert_ne!(compiler.contract_code_hash("B").unwrap(), [0; 32]);

    // Resolved declarations stay queryable.
    assert!(compiler.interface("A").unwrap().contains("\"f\""));
}

#[test]
fn test_reregistering_invalidates_results() {
    let mut compiler = compiler();
    compiler.add_source("a", "contract A {}", false);
    compiler.compile().unwrap();
    assert!(compiler.object("A").is_ok());

    assert!(compiler.add_source("a", "contract A { uint256 x; }", false));
    assert_eq!(
        compiler.object("A").unwrap_err(),
        CompilerError::State(StateError::NotCompiled)
    );
    assert_eq!(
        compiler.contract_names().unwrap_err(),
        CompilerError::State(StateError::NotParsed)
    );

    compiler.parse().unwrap();
    assert_eq!(
        compiler.object("A").unwrap_err(),
        CompilerError::State(StateError::NotCompiled)
    );
    compiler.compile().unwrap();
    assert!(compiler.object("A").is_ok());
}

#[test]
fn test_set_source_replaces_everything() {
    let mut compiler = Compiler::new();
    compiler.add_source("a", "contract A {}", false);
    compiler.set_source("contract B {}");

    assert!(compiler.source_text("a").is_err());
    assert_eq!(compiler.source_text("").unwrap(), "contract B {}");
    assert!(compiler.sources().contains("std"));
    compiler.compile().unwrap();
    assert_eq!(compiler.contract_names().unwrap(), vec!["B"]);
}

#[test]
fn test_reset_keeping_sources() {
    let mut compiler = compiler();
    compiler.add_source("a", "contract A {}", false);
    compiler.compile().unwrap();

    compiler.reset(true, false);
    assert_eq!(compiler.stage(), Stage::Empty);
    assert_eq!(compiler.source_text("a").unwrap(), "contract A {}");

    compiler.reset(false, true);
    assert!(compiler.source_text("a").is_err());
    assert!(compiler.sources().contains("owned"));
}

#[test]
fn test_import_cycles_are_permitted() {
    let mut compiler = compiler();
    compiler.add_source("a", "import \"a\"; import \"b\"; contract A {}", false);
    compiler.add_source("b", "import \"a\"; contract B {}", false);
    compiler.compile().unwrap();

    assert_eq!(compiler.source_order().unwrap(), ["b", "a"]);
    assert!(!compiler.object("A").unwrap().is_empty());
    assert!(!compiler.object("B").unwrap().is_empty());
}

#[test]
fn test_imports_precede_importers() {
    let mut compiler = compiler();
    compiler.add_source("base", "contract Base { uint256 x; }", false);
    compiler.add_source("mid", "import \"base\"; contract Mid is Base {}", false);
    compiler.add_source("app", "import \"mid\"; contract App is Mid {}", false);
    compiler.compile().unwrap();

    assert_eq!(compiler.source_order().unwrap(), ["base", "mid", "app"]);
    assert_eq!(compiler.default_contract_name().unwrap(), "Mid");
}

#[test]
fn test_library_units_compile_only_when_imported() {
    let mut compiler = compiler();
    compiler.add_source("lib", "contract Lib {}", true);
    compiler.add_source("other", "contract Other {}", true);
    compiler.add_source("main", "import \"lib\"; contract Main is Lib {}", false);
    compiler.compile().unwrap();

    assert_eq!(compiler.contract_names().unwrap(), vec!["Lib", "Main"]);
    assert_eq!(compiler.object("Other").unwrap_err(), not_found("Other"));
}

#[test]
fn test_standard_library_compiles() {
    let mut compiler = Compiler::new();
    compiler.add_source(
        "",
        "import \"std\";\ncontract Wallet is mortal { function deposit() public payable {} }",
        false,
    );
    compiler.compile().unwrap();

    let names = compiler.contract_names().unwrap();
    for name in ["Config", "NameReg", "Wallet", "configUser", "mortal", "named", "owned"] {
        assert!(names.contains(&name), "missing {name} in {names:?}");
    }
    assert_eq!(compiler.default_contract_name().unwrap(), "Wallet");
    assert!(!compiler.object("").unwrap().is_empty());
}

#[test]
fn test_static_compile() {
    let source = "contract A { uint256 x; function f() public { x = 1; } }";
    let object = Compiler::static_compile(source).unwrap();
    assert!(!object.is_empty());
    assert!(Compiler::static_compile("contract A {").unwrap_err().is_parse());
}

#[test]
fn test_compile_is_deterministic() {
    let source = "contract A { uint256 x; \
                  function f(uint256 a) public returns (uint256) { x = x + a; return x; } }";
    let mut first = compiler();
    first.add_source("a", source, false);
    first.compile().unwrap();
    let mut second = compiler();
    second.add_source("a", source, false);
    second.compile().unwrap();

    assert_eq!(first.object("A").unwrap(), second.object("A").unwrap());
    assert_eq!(
        first.contract_code_hash("A").unwrap(),
        second.contract_code_hash("A").unwrap()
    );

    // Recompiling the same registry changes nothing.
    let before = first.object("A").unwrap().clone();
    first.compile().unwrap();
    assert_eq!(first.object("A").unwrap(), &before);
}

#[test]
fn test_position_from_location() {
    let mut compiler = compiler();
    compiler.add_source("a", "contract A {\n  uint256 x;\n}", false);
    let location = SourceLocation::new("a", Span::new(15, 25));
    let (start, end) = compiler.position_from_location(&location).unwrap();
    assert_eq!((start.line, start.column), (2, 3));
    assert_eq!((end.line, end.column), (2, 13));

    let missing = SourceLocation::new("b", Span::new(0, 1));
    assert_eq!(
        compiler.position_from_location(&missing).unwrap_err(),
        CompilerError::State(StateError::SourceNotFound("b".into()))
    );
}

#[test]
fn test_function_entry_point() {
    let mut compiler = compiler();
    let source = "contract A { function f() public returns (uint256) { return 7; } \
                  function g() internal {} }";
    compiler.add_source("a", source, false);
    compiler.compile().unwrap();

    let definition = compiler.contract_definition("A").unwrap().clone();
    let f = definition.functions().find(|f| f.name.name == "f").unwrap();
    let g = definition.functions().find(|f| f.name.name == "g").unwrap();

    let entry = compiler.function_entry_point("A", f).unwrap();
    assert!(entry > 0);
    let items = compiler.runtime_assembly_items("A").unwrap().unwrap();
    assert!(
        matches!(&items[entry], covenant::AssemblyItem::Label(label) if label.starts_with("fun_f_"))
    );

    // Never called, so never lowered.
    assert_eq!(compiler.function_entry_point("A", g).unwrap(), 0);
}

#[test]
fn test_documentation() {
    let mut compiler = compiler();
    let source = "/// @title Counter\n/// @author someone\ncontract Counter {\n\
                  /// @notice Adds one.\nfunction inc() public {}\n}";
    compiler.add_source("a", source, false);
    compiler.parse().unwrap();

    let user = compiler.metadata("Counter", DocumentationType::NatspecUser).unwrap();
    assert!(user.contains("Adds one."));
    let dev = compiler.metadata("Counter", DocumentationType::NatspecDev).unwrap();
    assert!(dev.contains("someone"));
    assert!(compiler.interface("Counter").unwrap().contains("\"inc\""));
    assert!(compiler.solidity_interface("Counter").unwrap().contains("function inc()"));

    let kind: DocumentationType = "abi".parse().unwrap();
    assert_eq!(kind, DocumentationType::AbiInterface);
    assert!("bogus".parse::<DocumentationType>().unwrap_err().is_internal());
}

#[test]
fn test_resolution_errors_are_located() {
    let mut compiler = compiler();
    compiler.add_source("a", "contract A { function f() public { y = 1; } }", false);
    let err = compiler.parse().unwrap_err();
    assert!(err.is_resolution(), "unexpected error: {err}");
    assert_eq!(err.location().unwrap().source, "a");
}

#[test]
fn test_contract_names_are_unique_program_wide() {
    let mut compiler = compiler();
    compiler.add_source("a", "contract T { function a() public {} }", false);
    compiler.add_source("b", "contract T { function b() public {} }", false);

    let err = compiler.compile().unwrap_err();
    assert!(err.is_resolution(), "unexpected error: {err}");
    assert_eq!(
        err.location(),
        Some(&SourceLocation::new("b", Span::new(9, 10)))
    );
    assert_eq!(compiler.stage(), Stage::Failed);
}
