use changesim::core::config::SimulationConfig;
use changesim::harness::model::Change;
use changesim::harness::security::{SecurityValidator, extract_imports};

fn validator() -> SecurityValidator {
    SecurityValidator::new(&SimulationConfig::default())
}

#[test]
fn subprocess_run_anywhere_in_content_is_rejected() {
    let contents = [
        "def f(): return 1",
        "def deploy():\n    # harmless looking\n    return subprocess.run(['make'])\n",
    ];
    let report = validator().validate(&contents);
    assert!(!report.ok);
    assert!(!report.issues.is_empty());
    assert!(report.issues.iter().any(|i| i.starts_with("content[1]") && i.contains("subprocess.run")));
}

#[test]
fn every_forbidden_default_is_caught() {
    let config = SimulationConfig::default();
    let v = SecurityValidator::new(&config);
    for op in &config.forbidden_operations {
        let report = v.validate(&[format!("x = 1\n{}\n", op)]);
        assert!(!report.ok, "'{}' slipped through", op);
    }
}

#[test]
fn disallowed_imports_are_rejected_in_both_syntaxes() {
    for src in [
        "import numpy as np\n",
        "from pandas import DataFrame\n",
        "const _ = require('lodash');\n",
        "import express from 'express';\n",
    ] {
        let report = validator().validate(&[src]);
        assert!(!report.ok, "{} passed", src);
        assert!(report.issues[0].contains("disallowed import"), "{:?}", report.issues);
    }
}

#[test]
fn allow_listed_and_relative_imports_pass() {
    let src = "import os\nimport json, re\nfrom typing import List\nfrom .sibling import helper\nimport x from './local.js';\n";
    let report = validator().validate(&[src]);
    assert!(report.ok, "{:?}", report.issues);
}

#[test]
fn unparseable_content_fails_closed() {
    let report = validator().validate(&["import json +\n"]);
    assert!(!report.ok);
    assert!(report.issues[0].contains("unparseable import statement at line 1"));

    let binary = validator().validate(&["abc\0def"]);
    assert!(!binary.ok);
}

#[test]
fn dynamic_execution_primitives_are_flagged() {
    let config = SimulationConfig {
        forbidden_operations: Default::default(),
        ..SimulationConfig::default()
    };
    let v = SecurityValidator::new(&config);
    for src in [
        "__import__('os')",
        "import importlib\nimportlib.import_module(name)",
        "const f = new Function('return 1');",
        "exec (code)",
    ] {
        let report = v.validate(&[src]);
        assert!(
            report.issues.iter().any(|i| i.contains("dynamic code execution")),
            "{} -> {:?}",
            src,
            report.issues
        );
    }
}

#[test]
fn one_bad_change_invalidates_the_whole_set() {
    let changes = vec![
        Change::FileCreate {
            path: "ok.py".to_string(),
            content: "def ok(): return True\n".to_string(),
        },
        Change::LineInsert {
            path: "ok.py".to_string(),
            line_number: 1,
            content: "import os; os.system('rm -rf /')".to_string(),
        },
    ];
    let report = validator().validate_changes(&changes);
    assert!(!report.ok);
    assert!(report.issues.iter().all(|i| i.starts_with("ok.py:")));
}

#[test]
fn import_extraction_reports_line_numbers() {
    let imports = extract_imports("x = 1\n\nimport math\n").expect("parse");
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].line, 3);
    assert_eq!(imports[0].module, "math");
}

#[test]
fn imports_after_semicolons_and_compound_headers_are_checked() {
    for src in [
        "x = 1; import socket\n",
        "if True: import ctypes\n",
        "try: from pickle import loads\nexcept ImportError: pass\n",
    ] {
        let report = validator().validate(&[src]);
        assert!(!report.ok, "{:?} passed", src);
        assert!(
            report.issues.iter().any(|i| i.contains("import '")),
            "{:?} -> {:?}",
            src,
            report.issues
        );
    }
}

#[test]
fn builtins_attribute_eval_is_dynamic_execution() {
    let config = SimulationConfig {
        forbidden_operations: Default::default(),
        ..SimulationConfig::default()
    };
    let report = SecurityValidator::new(&config).validate(&["__builtins__.eval (payload)\n"]);
    assert!(!report.ok);
    assert!(report.issues.iter().any(|i| i.contains("dynamic code execution")));
}
