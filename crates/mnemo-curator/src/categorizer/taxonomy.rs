//! Static keyword tables for the four taxonomy branches and the technology
//! dictionary shared with the tagger.
//!
//! All phrases are lowercase, whole-word, and matched against
//! [`crate::text::word_haystack`].

use crate::memory::types::TopCategory;

/// Second-level label with the phrases that select it
pub struct SubCategory {
    pub label: &'static str,
    pub phrases: &'static [&'static str],
}

/// One top-level branch and its own sub-pattern set
pub struct Branch {
    pub top: TopCategory,
    pub phrases: &'static [&'static str],
    pub subs: &'static [SubCategory],
}

/// Label used when a branch wins but none of its sub-patterns match
pub const GENERAL_LABEL: &str = "general";

pub static BRANCHES: &[Branch] = &[
    Branch {
        top: TopCategory::Development,
        phrases: &[
            "function", "functions", "method", "class", "struct", "trait", "module", "api",
            "code", "refactor", "library", "crate", "package", "async", "await", "type",
            "types", "variable", "interface", "iterator", "iterators", "closure", "generic",
            "generics", "compile", "compiler", "syntax",
        ],
        subs: &[
            SubCategory {
                label: "best-practice",
                phrases: &[
                    "use", "prefer", "should", "avoid", "always", "never", "best practice",
                    "recommended", "idiomatic", "instead of", "convention",
                ],
            },
            SubCategory {
                label: "implementation",
                phrases: &[
                    "implement", "implemented", "implementing", "implementation", "wrote",
                    "write a", "added", "build a", "create a",
                ],
            },
            SubCategory {
                label: "testing",
                phrases: &[
                    "test", "tests", "unit test", "integration test", "mock", "mocks",
                    "assert", "coverage", "fixture",
                ],
            },
            SubCategory {
                label: "architecture",
                phrases: &[
                    "architecture", "design", "layer", "layers", "component", "components",
                    "dependency injection", "abstraction",
                ],
            },
            SubCategory {
                label: "optimization",
                phrases: &[
                    "optimize", "optimized", "optimise", "faster", "speed up", "allocation",
                    "allocations", "benchmark", "profiling", "cache", "caching",
                ],
            },
        ],
    },
    Branch {
        top: TopCategory::Troubleshooting,
        phrases: &[
            "error", "errors", "exception", "panic", "panics", "panicked", "crash", "crashes",
            "bug", "broken", "fails", "failed", "failing", "failure", "cannot", "debug",
            "debugging", "fix", "fixed", "workaround", "traceback", "stack trace",
        ],
        subs: &[
            SubCategory {
                label: "error",
                phrases: &[
                    "error", "errors", "exception", "panic", "panics", "panicked", "crash",
                    "fails", "failed", "cannot", "fix", "fixed", "resolve", "resolved",
                    "solution", "workaround", "traceback", "stack trace", "segfault",
                ],
            },
            SubCategory {
                label: "performance",
                phrases: &[
                    "slow", "slowdown", "memory leak", "leak", "high cpu", "bottleneck",
                    "timeout", "timeouts", "hang", "hangs", "deadlock",
                ],
            },
            SubCategory {
                label: "debugging",
                phrases: &["debugger", "breakpoint", "reproduce", "bisect", "logs", "trace"],
            },
        ],
    },
    Branch {
        top: TopCategory::Operations,
        phrases: &[
            "deploy", "deployed", "deployment", "docker", "kubernetes", "container",
            "containers", "server", "servers", "infrastructure", "ci", "release", "production",
            "staging", "cluster", "helm", "terraform", "nginx", "environment", "rollout",
        ],
        subs: &[
            SubCategory {
                label: "deployment",
                phrases: &[
                    "deploy", "deployed", "deployment", "release", "rollout", "rollback",
                    "docker", "container", "kubernetes", "helm", "image",
                ],
            },
            SubCategory {
                label: "configuration",
                phrases: &[
                    "config", "configuration", "environment variable", "env", "settings",
                    "yaml", "toml", "secret", "secrets",
                ],
            },
            SubCategory {
                label: "monitoring",
                phrases: &[
                    "monitoring", "metrics", "alert", "alerts", "dashboard", "observability",
                    "grafana", "prometheus",
                ],
            },
            SubCategory {
                label: "infrastructure",
                phrases: &[
                    "terraform", "cluster", "network", "dns", "load balancer", "vpc", "server",
                    "servers",
                ],
            },
        ],
    },
    Branch {
        top: TopCategory::Knowledge,
        phrases: &[
            "concept", "means", "definition", "defined", "refers to", "theory", "principle",
            "documentation", "docs", "learned", "understand", "explains", "decided", "decision",
        ],
        subs: &[
            SubCategory {
                label: "concept",
                phrases: &[
                    "concept", "means", "definition", "is a", "refers to", "principle",
                    "theory", "explains",
                ],
            },
            SubCategory {
                label: "reference",
                phrases: &["documentation", "docs", "reference", "rfc", "manual", "link"],
            },
            SubCategory {
                label: "decision",
                phrases: &["decided", "decision", "chose", "agreed", "convention", "team"],
            },
        ],
    },
];

/// Technology aliases mapped to their canonical name
pub static TECHNOLOGIES: &[(&str, &str)] = &[
    ("rust", "rust"),
    ("cargo", "rust"),
    ("tokio", "tokio"),
    ("axum", "axum"),
    ("serde", "serde"),
    ("python", "python"),
    ("pip", "python"),
    ("django", "django"),
    ("flask", "flask"),
    ("fastapi", "fastapi"),
    ("javascript", "javascript"),
    ("typescript", "typescript"),
    ("node", "nodejs"),
    ("nodejs", "nodejs"),
    ("npm", "nodejs"),
    ("react", "react"),
    ("vue", "vue"),
    ("angular", "angular"),
    ("golang", "go"),
    ("java", "java"),
    ("kotlin", "kotlin"),
    ("swift", "swift"),
    ("ruby", "ruby"),
    ("rails", "rails"),
    ("php", "php"),
    ("csharp", "csharp"),
    ("dotnet", "csharp"),
    ("cpp", "cpp"),
    ("sql", "sql"),
    ("postgres", "postgresql"),
    ("postgresql", "postgresql"),
    ("mysql", "mysql"),
    ("sqlite", "sqlite"),
    ("redis", "redis"),
    ("mongodb", "mongodb"),
    ("kafka", "kafka"),
    ("graphql", "graphql"),
    ("grpc", "grpc"),
    ("docker", "docker"),
    ("kubernetes", "kubernetes"),
    ("k8s", "kubernetes"),
    ("helm", "helm"),
    ("terraform", "terraform"),
    ("nginx", "nginx"),
    ("aws", "aws"),
    ("gcp", "gcp"),
    ("azure", "azure"),
    ("linux", "linux"),
    ("git", "git"),
];

/// Source file extensions mapped to canonical technology names
pub static EXTENSIONS: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("js", "javascript"),
    ("mjs", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("go", "go"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("swift", "swift"),
    ("rb", "ruby"),
    ("php", "php"),
    ("cs", "csharp"),
    ("cpp", "cpp"),
    ("cc", "cpp"),
    ("sql", "sql"),
    ("tf", "terraform"),
];

/// Level-4 facets: label and the phrases that select it
pub static FACETS: &[(&str, &[&str])] = &[
    ("async", &["async", "await", "concurrency", "concurrent", "thread", "threads", "runtime"]),
    ("testing", &["test", "tests", "mock", "assert", "coverage"]),
    ("security", &["security", "auth", "authentication", "password", "vulnerability", "tls"]),
    ("performance", &["performance", "latency", "throughput", "slow", "optimize", "faster"]),
    ("database", &["database", "query", "queries", "index", "migration", "transaction"]),
    ("networking", &["http", "request", "socket", "network", "tcp", "websocket"]),
];
