//! Human readable rendering of plans, reports and records.

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use facetsmith_deploy::{
    CutOperation, TargetPlan, TargetReport, TargetStatus,
    error::CoreFacetDrift,
};

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn selectors(op: &CutOperation) -> String {
    op.selectors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn live(live: bool) -> &'static str {
    if live { "live" } else { "deploy" }
}

pub fn plan(plan: &TargetPlan) -> String {
    let mut out = format!(
        "Target {} ({} / chain {})\n",
        plan.target, plan.network, plan.chain_id
    );

    let mut contracts = table(vec!["Contract", "Address", "State"]);
    contracts.add_row(vec![
        plan.proxy.name.clone(),
        plan.proxy.address.to_string(),
        live(plan.proxy.live).to_string(),
    ]);
    for contract in &plan.contracts {
        contracts.add_row(vec![
            contract.name.clone(),
            contract.address.to_string(),
            live(contract.live).to_string(),
        ]);
    }
    out.push_str(&format!("{}\n", contracts));

    if plan.plan.is_empty() {
        out.push_str("No cut needed.\n");
    } else {
        let mut cut = table(vec!["Action", "Facet", "Address", "Selectors"]);
        for op in &plan.plan.operations {
            cut.add_row(vec![
                op.action.to_string(),
                op.facet_name.clone(),
                op.facet.to_string(),
                selectors(op),
            ]);
        }
        out.push_str(&format!("{}\n", cut));
    }

    if !plan.plan.core_drift.is_empty() {
        out.push_str(&drift(&plan.plan.core_drift));
    }

    if plan.initialize {
        out.push_str("Initializer will be called.\n");
    }
    if plan.is_converged() {
        out.push_str("Up to date.\n");
    }
    out
}

fn drift(drift: &[CoreFacetDrift]) -> String {
    let mut out = String::from("Core facet changes held back (use --confirm-core-changes):\n");
    for item in drift {
        out.push_str(&format!("  - {}\n", item));
    }
    out
}

pub fn report(report: &TargetReport) -> String {
    let mut out = format!(
        "Target {} converged: proxy {} on chain {}, {} transaction(s)\n",
        report.target, report.proxy, report.chain_id, report.transactions
    );
    for (name, address) in &report.deployed {
        out.push_str(&format!("  deployed {} at {}\n", name, address));
    }
    for op in &report.operations {
        out.push_str(&format!(
            "  {} {} ({} selector(s))\n",
            op.action,
            op.facet_name,
            op.selectors.len()
        ));
    }
    if report.initialized {
        out.push_str("  initializer called\n");
    }
    out
}

pub fn status(statuses: &[TargetStatus]) -> String {
    let mut table = table(vec![
        "Target", "Network", "Chain", "Proxy", "Stage", "Facets", "Selectors", "Cuts", "Updated",
    ]);

    for status in statuses {
        let Some(record) = &status.record else {
            table.add_row(vec![
                status.target.clone(),
                status.network.clone(),
                "-".into(),
                "not deployed".into(),
                "-".into(),
                "-".into(),
                "-".into(),
                "-".into(),
                "-".into(),
            ]);
            continue;
        };

        let stage = match (&record.failure, &record.pending) {
            (Some(failure), _) => format!("{} ({})", record.stage, failure),
            (None, Some(pending)) => format!("{} (pending {})", record.stage, pending.hash),
            (None, None) => record.stage.to_string(),
        };

        table.add_row(vec![
            status.target.clone(),
            status.network.clone(),
            record.chain_id.to_string(),
            record.proxy.to_string(),
            stage,
            record.facets.len().to_string(),
            record.composition.len().to_string(),
            record.history.len().to_string(),
            record.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ]);
    }

    table.to_string()
}
