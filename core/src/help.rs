//! Help system: usage text for `hcv`.
//!
//! `hcv help` prints the overview; `hcv help <topic>` prints a command or a
//! manifest reference.


/// Generate help text for a given topic.
///
/// - `None` → overview
/// - `Some("apply")` → detailed help for one command
/// - `Some("manifest")` → manifest reference
pub fn help_text(topic: Option<&str>) -> String {
    match topic {
        None => overview(),
        Some(t) => command_help(t).unwrap_or_else(|| {
            format!("Unknown help topic: '{}'. Run 'hcv help' for a list of commands.", t)
        }),
    }
}


fn overview() -> String {
    "\
hcv: converge a host to a declared state

Usage: hcv <command> <manifest> [--json] [--settings <path>]

Commands:
  plan <manifest>            Print the execution order; touches nothing
  validate <manifest>        Plan, then check firewall policy against live chains
  apply <manifest>           Converge the host and print a per-resource report
  help [topic]               Show help (this message, or help on a topic)

Topics: plan, validate, apply, manifest, settings

Exit codes:
  0  every resource converged (no-op, created or updated)
  1  a resource failed; later resources were skipped
  2  the manifest, graph or firewall policy was rejected; nothing was applied

Logging is controlled by HCV_LOG (or RUST_LOG), e.g. HCV_LOG=hostconv_core=debug"
        .into()
}


fn command_help(topic: &str) -> Option<String> {
    let text = match topic {
        "plan" => "\
hcv plan <manifest> [--json]

Build the dependency graph and print resources in execution order. Ties are
broken by declaration order. Cycles and rules that break chain order are
reported without contacting the host.",

        "validate" => "\
hcv validate <manifest> [--json] [--settings <path>]

Plan, then check every firewall chain the manifest touches:
  - no rule may be shadowed by an earlier terminal rule in the same chain
  - every chain must end closed: a DROP policy, or a final unconditional
    ACCEPT/DROP/REJECT rule, or an explicit ACCEPT policy declaration
Live chain policies are read from the host with read-only queries.",

        "apply" => "\
hcv apply <manifest> [--json] [--settings <path>]

Validate, then converge each resource in plan order: observe, skip if
already satisfied, otherwise apply. The first failure stops the run and
every later resource is reported as skipped. Only services are retried.",

        "manifest" => "\
Manifest format (YAML):

  resources:
    - kind: package          # name, version, source, action: install|remove
    - kind: service          # name, actions: [start, stop, restart, enable, disable]
    - kind: file             # path, source, owner, mode
    - kind: firewall_chain   # name, table (default filter), policy: ACCEPT|DROP
    - kind: firewall_rule    # id, chain, table, match, target, target_args

Every entry may set `id` and `depends_on: [\"kind:id\"]`.",

        "settings" => "\
Engine settings (YAML), from --settings or HCV_SETTINGS:

  max_attempts: 3            # attempts per service resource
  backoff_strategy: fixed    # fixed | linear | exponential
  base_delay_ms: 500",

        _ => return None,
    };
    Some(text.into())
}
