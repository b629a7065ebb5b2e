use covenant::{AssemblyItem, Compiler, CompilerOptions, RevertStrings};
use pretty_assertions::assert_eq;
use sha3::{Digest, Keccak256};

fn compile_with(options: CompilerOptions, source: &str) -> Compiler {
    let mut compiler = Compiler::with_options(options.with_standard_sources(false));
    compiler.add_source("a", source, false);
    if let Err(err) = compiler.compile() {
        panic!("compilation failed: {err}");
    }
    compiler
}

fn compile(source: &str) -> Compiler {
    compile_with(CompilerOptions::new(), source)
}

fn labels<'a>(items: &'a [AssemblyItem], prefix: &str) -> Vec<&'a str> {
    items
        .iter()
        .filter_map(|item| match item {
            AssemblyItem::Label(label) if label.starts_with(prefix) => Some(label.as_str()),
            _ => None,
        })
        .collect()
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn test_shared_callee_is_emitted_once() {
    let compiler = compile(
        "contract A {
            function helper(uint256 v) internal returns (uint256) { return v + 1; }
            function f() public returns (uint256) { return helper(1); }
            function g() public returns (uint256) { return helper(helper(2)); }
        }",
    );
    let runtime = compiler.runtime_assembly_items("A").unwrap().unwrap();
    assert_eq!(labels(runtime, "fun_helper_").len(), 1);
    assert_eq!(labels(runtime, "fun_f_").len(), 1);
    assert_eq!(labels(runtime, "fun_g_").len(), 1);
}

#[test]
fn test_recursive_functions_terminate() {
    let compiler = compile(
        "contract A {
            function even(uint256 n) internal returns (bool) {
                if (n == 0) return true;
                return odd(n - 1);
            }
            function odd(uint256 n) internal returns (bool) {
                if (n == 0) return false;
                return even(n - 1);
            }
            function check(uint256 n) public returns (bool) { return even(n); }
        }",
    );
    let runtime = compiler.runtime_assembly_items("A").unwrap().unwrap();
    assert_eq!(labels(runtime, "fun_even_").len(), 1);
    assert_eq!(labels(runtime, "fun_odd_").len(), 1);
}

#[test]
fn test_immutables_get_distinct_placeholders() {
    let compiler = compile(
        "contract A {
            uint256 immutable a;
            uint256 immutable b;
            constructor() { a = 1; b = 2; }
            function sum() public view returns (uint256) { return a + b; }
        }",
    );
    let runtime = compiler.runtime_object("A").unwrap();
    assert_eq!(runtime.immutable_references.len(), 2);
    let mut positions: Vec<usize> = runtime
        .immutable_references
        .values()
        .flatten()
        .copied()
        .collect();
    let count = positions.len();
    positions.sort_unstable();
    positions.dedup();
    assert_eq!(positions.len(), count);
    for pair in positions.windows(2) {
        assert!(pair[1] - pair[0] >= 32, "placeholders overlap: {pair:?}");
    }
    assert!(
        runtime
            .immutable_references
            .keys()
            .all(|name| name.starts_with("immutable_"))
    );
}

#[test]
fn test_function_pointers_use_internal_dispatch() {
    let compiler = compile(
        "contract A {
            function (uint256) returns (uint256) op;
            function double(uint256 v) internal returns (uint256) { return v + v; }
            constructor() { op = double; }
            function run(uint256 v) public returns (uint256) { return op(v); }
        }",
    );
    let creation = compiler.assembly_items("A").unwrap().unwrap();
    let runtime = compiler.runtime_assembly_items("A").unwrap().unwrap();
    // Assigned in the constructor, called at runtime: both sides need the body.
    assert_eq!(labels(creation, "fun_double_").len(), 1);
    assert_eq!(labels(runtime, "fun_double_").len(), 1);
    let dispatcher = "dispatch_internal_in_1_out_1";
    assert_eq!(labels(runtime, dispatcher), vec![dispatcher]);
}

#[test]
fn test_unassigned_pointer_still_gets_a_dispatcher() {
    let compiler = compile(
        "contract A {
            function run() public returns (uint256) {
                function (uint256) returns (uint256) f;
                return f(1);
            }
        }",
    );
    let runtime = compiler.runtime_assembly_items("A").unwrap().unwrap();
    assert_eq!(labels(runtime, "dispatch_internal_in_1_out_1").len(), 1);
}

#[test]
fn test_clone_object_links_to_original() {
    let compiler = compile("contract Wallet { function ping() public {} }");
    let clone = compiler.clone_object("Wallet").unwrap();
    assert!(!clone.is_empty());
    assert_eq!(
        clone.link_references.values().collect::<Vec<_>>(),
        vec!["Wallet"]
    );
    assert!(compiler.object("Wallet").unwrap().link_references.is_empty());
}

#[test]
fn test_code_hash_is_keccak_of_runtime() {
    let compiler = compile(
        "contract A { uint256 x; function set(uint256 v) public { x = v; } }",
    );
    let runtime = compiler.runtime_object("A").unwrap();
    let expected: [u8; 32] = Keccak256::digest(&runtime.bytecode).into();
    assert_eq!(compiler.contract_code_hash("A").unwrap(), expected);
}

#[test]
fn test_created_contracts_compile_first() {
    let compiler = compile(
        "contract Factory { function make() public returns (Child) { return new Child(); } }
         contract Child { uint256 x; }",
    );
    let factory = compiler.compiled_contract("Factory").unwrap();
    let artifacts = factory.artifacts().unwrap();
    let subs: Vec<&str> = artifacts.runtime_assembly.subs().iter().map(|sub| sub.name()).collect();
    assert_eq!(subs, vec!["Child"]);
    assert!(!compiler.object("Child").unwrap().is_empty());
}

#[test]
fn test_revert_strings() {
    let source =
        "contract A { function f(uint256 v) public { require(v > 1, \"value too small\"); } }";
    let kept = compile(source);
    let strip = CompilerOptions::new().with_revert_strings(RevertStrings::Strip);
    let stripped = compile_with(strip, source);

    let message = b"value too small";
    let kept = &kept.runtime_object("A").unwrap().bytecode;
    let stripped = &stripped.runtime_object("A").unwrap().bytecode;
    assert!(contains_bytes(kept, message));
    assert!(!contains_bytes(stripped, message));
}

#[test]
fn test_assembly_listing() {
    let compiler = compile("contract A { function f() public {} }");
    let mut listing = String::new();
    compiler.stream_assembly(&mut listing, "A").unwrap();
    assert!(listing.contains("sub_0: assembly \"A_deployed\""));
    assert!(listing.contains("fun_f_"));
}
