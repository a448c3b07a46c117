//! Built-in filter checks, runnable without network access or a ledger.

use std::fmt;

use crate::error::AppError;
use crate::filter::PatternFilter;

/// One fixed title with the filter it runs against and the expected verdict.
#[derive(Debug, Clone, Copy)]
pub struct SelfTestCase {
    pub name: &'static str,
    pub include: &'static [&'static str],
    pub exclude: &'static [&'static str],
    pub title: &'static str,
    pub expected: bool,
}

const RELEASE_PATTERN: &[&str] = &[r"1080p.*(WEBRip|BluRay).*-Provider"];

pub const CASES: &[SelfTestCase] = &[
    SelfTestCase {
        name: "include matches case-insensitively",
        include: &["movie"],
        exclude: &[],
        title: "This is a Movie",
        expected: true,
    },
    SelfTestCase {
        name: "no include match",
        include: &["movie"],
        exclude: &[],
        title: "This is not a film",
        expected: false,
    },
    SelfTestCase {
        name: "exclude wins over include",
        include: &["movie"],
        exclude: &["bad"],
        title: "This is a Movie but bad",
        expected: false,
    },
    SelfTestCase {
        name: "empty title with include patterns",
        include: &["movie"],
        exclude: &["bad"],
        title: "",
        expected: false,
    },
    SelfTestCase {
        name: "empty title without include patterns",
        include: &[],
        exclude: &[],
        title: "",
        expected: false,
    },
    SelfTestCase {
        name: "no include patterns accepts anything not excluded",
        include: &[],
        exclude: &["cam"],
        title: "Movie.A.2025.1080p.WEBRip-Provider",
        expected: true,
    },
    SelfTestCase {
        name: "release pattern accepts 1080p WEBRip",
        include: RELEASE_PATTERN,
        exclude: &[],
        title: "Movie.A.2025.1080p.WEBRip-Provider",
        expected: true,
    },
    SelfTestCase {
        name: "release pattern rejects 720p HDTV",
        include: RELEASE_PATTERN,
        exclude: &[],
        title: "Movie.B.2025.720p.HDTV-Provider",
        expected: false,
    },
    SelfTestCase {
        name: "alternatives are tried in order",
        include: &["2160p", "1080p"],
        exclude: &[],
        title: "Movie.C.2024.1080p.BluRay",
        expected: true,
    },
];

/// Verdict of a single case.
#[derive(Debug, Clone)]
pub struct CaseResult {
    pub name: &'static str,
    pub title: &'static str,
    pub expected: bool,
    pub actual: Result<bool, String>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        matches!(self.actual, Ok(actual) if actual == self.expected)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelfTestReport {
    pub results: Vec<CaseResult>,
}

impl SelfTestReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseResult> {
        self.results.iter().filter(|r| !r.passed())
    }
}

impl fmt::Display for SelfTestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} filter checks passed",
            self.passed(),
            self.results.len()
        )
    }
}

/// Run the built-in cases.
pub fn run() -> SelfTestReport {
    run_cases(CASES)
}

pub fn run_cases(cases: &[SelfTestCase]) -> SelfTestReport {
    let results = cases
        .iter()
        .map(|case| {
            let actual = PatternFilter::new(case.include, case.exclude)
                .map(|filter| filter.matches(case.title))
                .map_err(|e: AppError| e.to_string());
            CaseResult {
                name: case.name,
                title: case.title,
                expected: case.expected,
                actual,
            }
        })
        .collect();
    SelfTestReport { results }
}
