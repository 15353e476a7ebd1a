use std::fs;
use std::process::{Command, Output};

use tempfile::tempdir;

fn quince(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_quince"))
        .args(args)
        .env("QUINCE_LOG", "off")
        .env_remove("QUINCE_MAX_DEPTH")
        .output()
        .expect("failed to run quince")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn eval_flag_prints_the_result() {
    let output = quince(&["-e", "(+ 1 2)", "--print"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "3\n");
}

#[test]
fn runs_a_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("hello.qn");
    fs::write(&path, "(defn greet [who] (str \"hello, \" who))\n(println (greet \"quince\"))\n")
        .expect("write");
    let output = quince(&[path.to_str().expect("utf-8 path")]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "hello, quince\n");
}

#[test]
fn compile_errors_exit_with_status_one() {
    let output = quince(&["-e", "(if)"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("-e:1: Too few arguments to if"),
        "{}",
        stderr(&output)
    );
}

#[test]
fn runtime_errors_show_class_and_location() {
    let output = quince(&["-e", "(do 1)\n(/ 1 0)"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("-e:2: ZeroDivisionError: divided by 0"),
        "{}",
        stderr(&output)
    );
}

#[test]
fn dump_prints_the_disassembly() {
    let output = quince(&["--dump", "-e", "(+ 1 2)"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).starts_with("; -e form 0"), "{}", stdout(&output));
}

const COUNT_DOWN: &str = "(def f (fn f [n] (if (= n 0) 0 (+ 1 (f (dec n))))))";

#[test]
fn deep_recursion_runs_on_the_evaluation_stack() {
    let code = format!("{} (f 1500)", COUNT_DOWN);
    let output = quince(&["-e", code.as_str(), "--print"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "1500\n");
}

#[test]
fn runaway_recursion_is_reported_not_fatal() {
    let code = format!("{} (f 200000)", COUNT_DOWN);
    let output = quince(&["-e", code.as_str()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("-e:1: SystemStackError: stack level too deep"),
        "{}",
        stderr(&output)
    );
}

#[test]
fn depth_limit_follows_the_environment() {
    let code = format!("{} (f 100)", COUNT_DOWN);
    let output = Command::new(env!("CARGO_BIN_EXE_quince"))
        .args(["-e", code.as_str()])
        .env("QUINCE_LOG", "off")
        .env("QUINCE_MAX_DEPTH", "50")
        .output()
        .expect("failed to run quince");
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("SystemStackError: stack level too deep"),
        "{}",
        stderr(&output)
    );
}

#[test]
fn deeply_nested_files_are_syntax_errors() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("deep.qn");
    fs::write(&path, format!("{}{}", "(".repeat(20_000), ")".repeat(20_000))).expect("write");
    let output = quince(&[path.to_str().expect("utf-8 path")]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains(":1: Form nested too deeply (max depth: "),
        "{}",
        stderr(&output)
    );
}
