use colored::{ColoredString, Colorize};

const TAG: &str = "[ocpkvm]";
const LABEL_WIDTH: usize = 18;

/// How a piece of terminal text should read at a glance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Plain,
    Muted,
    Good,
    Caution,
    Bad,
}

impl Tone {
    fn paint(self, text: &str) -> ColoredString {
        match self {
            Self::Plain => text.normal(),
            Self::Muted => text.dimmed(),
            Self::Good => text.green(),
            Self::Caution => text.yellow(),
            Self::Bad => text.red(),
        }
    }
}

fn tag(tone: Tone) -> ColoredString {
    match tone {
        Tone::Bad => TAG.bold().red(),
        _ => TAG.bold().cyan(),
    }
}

fn say(tone: Tone, msg: &str) {
    println!("{} {}", tag(tone), tone.paint(msg));
}

pub fn info(msg: &str) {
    say(Tone::Plain, msg);
}

pub fn success(msg: &str) {
    say(Tone::Good, msg);
}

pub fn warn(msg: &str) {
    say(Tone::Caution, msg);
}

/// Errors go to stderr so JSON on stdout stays parseable.
pub fn error(msg: &str) {
    eprintln!("{} {}", tag(Tone::Bad), Tone::Bad.paint(msg));
}

/// Numbered progress through `up`, preceded by a blank line.
pub fn step(n: u32, total: u32, msg: &str) {
    let counter = format!("Step {}/{}:", n, total);
    println!("\n{} {} {}", tag(Tone::Plain), counter.bold().yellow(), msg);
}

/// Lines framed by `=` rules, padded to the longest line.
fn framed(lines: &[&str]) -> Vec<String> {
    let inner = lines.iter().map(|l| l.len()).max().unwrap_or(0);
    let rule = "=".repeat(inner + 4);
    let mut out = Vec::with_capacity(lines.len() + 2);
    out.push(rule.clone());
    out.extend(lines.iter().map(|l| format!("  {:<inner$}  ", l, inner = inner)));
    out.push(rule);
    out
}

pub fn banner(lines: &[&str]) {
    println!();
    for line in framed(lines) {
        println!("{}", line.bold().green());
    }
    println!();
}

pub fn header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "-".repeat(title.len()).dimmed());
}

/// Preflight verdicts get colour; anything else prints as-is.
fn verdict_tone(value: &str) -> Tone {
    match value {
        "OK" => Tone::Good,
        "-" => Tone::Muted,
        v if v.starts_with("Missing") => Tone::Bad,
        v if v.starts_with("Already") => Tone::Caution,
        _ => Tone::Plain,
    }
}

/// `label` left-aligned in a fixed column, then the value.
pub fn status_line(label: &str, value: &str) {
    println!(
        "{} {}",
        format!("{:<width$}", label, width = LABEL_WIDTH).bold(),
        verdict_tone(value).paint(value)
    );
}

/// Yes/no prompt defaulting to no. A closed stdin counts as no.
pub fn confirm(msg: &str) -> bool {
    inquire::Confirm::new(msg)
        .with_default(false)
        .prompt()
        .unwrap_or(false)
}
