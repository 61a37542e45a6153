use crate::prelude::*;
use clap::ValueEnum;
use proctree::{Pid, ProcTree, Process};
use serde::Serialize;
use std::convert::Infallible;
use tabled::settings::object::{Columns, Rows};
use tabled::settings::{Alignment, Color, Modify, Style};
use tabled::{Table, Tabled};

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Indented tree, one process per line
    #[default]
    Tree,
    /// One row per process, in walk order
    Table,
    /// Pretty JSON, readable back with --snapshot
    Json,
}

pub fn render(tree: &ProcTree, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Tree => Ok(build_tree(tree)),
        OutputFormat::Table => Ok(build_table(tree)),
        OutputFormat::Json => build_json(tree),
    }
}

fn label(process: &Process) -> String {
    format!("{} {}", process.pid(), process.executable().unwrap_or_default())
}

fn build_tree(tree: &ProcTree) -> String {
    let mut output = String::new();
    for root in tree.roots() {
        output.push_str(&label(&root));
        output.push('\n');
        push_children(&root, "", &mut output);
    }
    output
}

fn push_children(process: &Process, prefix: &str, output: &mut String) {
    let children = process.children();
    let last_index = children.len().saturating_sub(1);
    for (index, child) in children.iter().enumerate() {
        let (branch, indent) = if index == last_index {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        output.push_str(&format!("{prefix}{branch}{}\n", label(child)));
        // A self-parented process is never listed among its own children
        push_children(child, &format!("{prefix}{indent}"), output);
    }
}

#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "PID")]
    pid: Pid,
    #[tabled(rename = "PPID")]
    ppid: String,
    #[tabled(rename = "ORIGINAL PPID")]
    original_ppid: String,
    #[tabled(rename = "EXECUTABLE")]
    executable: String,
    #[tabled(rename = "DEPTH")]
    depth: usize,
}

fn pid_or_dash(process: Option<Process>) -> String {
    process.map_or_else(|| "-".to_string(), |p| p.pid().to_string())
}

fn build_table(tree: &ProcTree) -> String {
    let mut rows = Vec::new();
    tree.walk(|process| {
        rows.push(ProcessRow {
            pid: process.pid(),
            ppid: pid_or_dash(process.parent()),
            original_ppid: pid_or_dash(process.original_parent()),
            executable: process.executable().unwrap_or_default(),
            depth: process.depth(),
        });
        Ok::<_, Infallible>(())
    })
    .unwrap_or_else(|never| match never {});

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Color::BOLD))
        .with(Modify::new(Columns::new(0..3)).with(Alignment::right()));
    table.to_string()
}

#[derive(Serialize)]
struct ProcessView {
    pid: Pid,
    ppid: Pid,
    parent: Option<Pid>,
    executable: String,
    depth: usize,
    children: Vec<Pid>,
}

fn build_json(tree: &ProcTree) -> Result<String> {
    let views: Vec<ProcessView> = tree
        .processes()
        .iter()
        .map(|process| ProcessView {
            pid: process.pid(),
            ppid: process.ppid().unwrap_or_default(),
            parent: process.parent().map(|p| p.pid()),
            executable: process.executable().unwrap_or_default(),
            depth: process.depth(),
            children: process.children().iter().map(Process::pid).collect(),
        })
        .collect();
    let mut output = serde_json::to_string_pretty(&views).context("Failed to serialize tree")?;
    output.push('\n');
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctree::{Config, ConfigOption, ProcessRecord, StaticSource};

    const SYSTEM: &[(Pid, Pid, &str)] = &[
        (1, 0, "init"),
        (100, 1, "sshd"),
        (110, 100, "bash"),
        (120, 110, "vim"),
        (130, 100, "bash"),
        (200, 1, "cron"),
        (900, 0, "orphan"),
    ];

    fn tree(config: Config) -> ProcTree {
        let records = SYSTEM
            .iter()
            .map(|&(pid, ppid, executable)| ProcessRecord::new(pid, ppid, executable))
            .collect();
        ProcTree::with_source(config, StaticSource::new(records)).unwrap()
    }

    #[test]
    fn test_tree_output() {
        let output = render(&tree(Config::default()), OutputFormat::Tree).unwrap();
        insta::assert_snapshot!(output.trim_end(), @r###"
        1 init
        ├── 100 sshd
        │   ├── 110 bash
        │   │   └── 120 vim
        │   └── 130 bash
        └── 200 cron
        900 orphan
        "###);
    }

    #[test]
    fn test_tree_output_with_root() {
        let config = Config::new([ConfigOption::RootPid(110), ConfigOption::RootPid(200)]);
        let output = render(&tree(config), OutputFormat::Tree).unwrap();
        insta::assert_snapshot!(output.trim_end(), @r###"
        110 bash
        └── 120 vim
        200 cron
        "###);
    }

    #[test]
    fn test_table_output() {
        let config = Config::new([
            ConfigOption::RootPid(110),
            ConfigOption::IncludeRootAncestors(true),
        ]);
        let output = render(&tree(config), OutputFormat::Table).unwrap();

        for header in ["PID", "PPID", "ORIGINAL PPID", "EXECUTABLE", "DEPTH"] {
            assert!(output.contains(header), "missing {header} in\n{output}");
        }
        let lines: Vec<&str> = output.lines().collect();
        // top border, header, separator, 4 rows, bottom border
        assert_eq!(lines.len(), 8);
        assert!(lines[3].contains("init"));
        assert!(lines[6].contains("vim"));
        assert!(!output.contains("cron"));
    }

    #[test]
    fn test_table_rows_follow_walk_order() {
        let output = render(&tree(Config::default()), OutputFormat::Table).unwrap();

        let cells: Vec<Vec<&str>> = output
            .lines()
            .skip(3)
            .filter(|line| line.starts_with('│'))
            .map(|line| line.split('│').map(str::trim).filter(|c| !c.is_empty()).collect())
            .collect();
        let pids: Vec<&str> = cells.iter().map(|row| row[0]).collect();
        assert_eq!(pids, ["1", "100", "110", "120", "130", "200", "900"]);
        assert_eq!(cells[3], ["120", "110", "110", "vim", "3"]);
        assert_eq!(cells[6], ["900", "-", "-", "orphan", "0"]);
    }

    #[test]
    fn test_json_output_reads_back_as_records() {
        let output = render(&tree(Config::default()), OutputFormat::Json).unwrap();

        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value[1]["pid"], 100);
        assert_eq!(value[1]["children"], serde_json::json!([110, 130]));
        assert_eq!(value[3]["depth"], 3);
        assert_eq!(value[6]["parent"], serde_json::Value::Null);

        let records: Vec<ProcessRecord> = serde_json::from_str(&output).unwrap();
        assert_eq!(records.len(), SYSTEM.len());
        assert_eq!(records[2], ProcessRecord::new(110, 100, "bash"));
    }

    #[test]
    fn test_empty_tree() {
        let tree = ProcTree::with_source(Config::default(), StaticSource::default()).unwrap();
        assert_eq!(render(&tree, OutputFormat::Tree).unwrap(), "");
        assert_eq!(render(&tree, OutputFormat::Json).unwrap(), "[]\n");
    }
}
