//! End-to-end runs of the built-in document against a Go module.
//!
//! These need `go` and `gofmt` on `PATH`.
//! Run with: `cargo test -p gitix --test go_toolchain -- --ignored`

use std::path::Path;
use std::process::{Command, Output};

use gitix::exit_codes;
use gitix::io::toolchain::{GoToolchain, Toolchain};
use gitix::test_support::TestRepo;
use gitix::workspace::{MaterializeRequest, materialize};

fn module_repo() -> TestRepo {
    let repo = TestRepo::new();
    repo.write("go.mod", "module example.com/m\n\ngo 1.21\n");
    repo.write("p/x.go", "package p\n\nfunc X() int { return 1 }\n");
    repo.write("q/y.go", "package q\n\nfunc Y() int { return 2 }\n");
    repo.commit_all("init");
    repo
}

fn gitix(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gitix"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run gitix")
}

#[test]
#[ignore = "requires the go toolchain"]
fn go_list_resolves_module_and_packages() {
    let repo = module_repo();

    let root = GoToolchain.root_package(repo.path()).expect("root package");
    let packages = GoToolchain
        .list_packages(repo.path(), &Vec::new())
        .expect("packages");

    assert_eq!(root, "example.com/m");
    assert_eq!(
        packages,
        vec!["example.com/m/p".to_string(), "example.com/m/q".to_string()]
    );
}

#[test]
#[ignore = "requires the go toolchain"]
fn uncommitted_edit_selects_its_package() {
    let repo = module_repo();
    repo.write("p/x.go", "package p\n\nfunc X() int { return 3 }\n");

    let request = MaterializeRequest::new(
        repo.path(),
        vec!["*.go".to_string(), ":(exclude)vendor/".to_string()],
    );
    let ws = materialize(&request, &GoToolchain).expect("materialize");

    assert_eq!(ws.changes().packages, vec!["example.com/m/p".to_string()]);
}

#[test]
#[ignore = "requires the go toolchain"]
fn default_document_passes_on_clean_edit() {
    let repo = module_repo();
    repo.write("p/x.go", "package p\n\nfunc X() int { return 3 }\n");

    let output = gitix(repo.path(), &[]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    for step in ["build", "vet", "fmt", "test compile"] {
        assert!(stdout.contains(&format!("{step} passed")), "{stdout}");
    }
}

#[test]
#[ignore = "requires the go toolchain"]
fn default_document_fails_on_syntax_error() {
    let repo = module_repo();
    repo.write("p/x.go", "package p\n\nfunc X() int { return \n");

    let output = gitix(repo.path(), &[]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed: `"));
}
