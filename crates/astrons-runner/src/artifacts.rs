//! Writers for the files a run leaves behind.

use crate::stats::Summary;
use astrons_engine::{MessageHistory, NodeEntry, Simulation};
use std::io::{self, Write};

/// `loaded_node_config.txt`: every node's effective configuration after
/// DEFAULT and override composition, for eyeballing load mistakes.
pub fn write_loaded_config(sim: &Simulation, w: &mut dyn Write) -> io::Result<()> {
    for node in sim.nodes() {
        writeln!(w, "{} [{}]", node.label, node.kind)?;
        for (key, value) in node.config.iter() {
            writeln!(w, "    {}: {}", key, value)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// `loaded_network.json`: the parsed scope documents, top-level first.
pub fn write_loaded_network(
    documents: &[serde_json::Value],
    w: &mut dyn Write,
) -> io::Result<()> {
    let text = serde_json::to_string_pretty(documents)?;
    writeln!(w, "{}", text)
}

/// `msg_history.txt`: human-readable hop trace per message.
pub fn write_msg_history(history: &MessageHistory, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "\nMsg History")?;
    for (id, hops) in history.iter() {
        writeln!(w, "Msg: {}", id)?;
        for hop in hops {
            writeln!(
                w,
                "{:.6} {} {} -> {} reserve={} delay={} wait={} {}",
                hop.time.as_secs_f64(),
                hop.datetime
                    .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                hop.from,
                hop.to,
                hop.reserve,
                hop.total_delay,
                hop.wait,
                hop.message.to_json(),
            )?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// `msg_history.csv`: one row per hop. The `delay` column is the emit delay
/// in excess of the reserve, matching the historical column meaning.
pub fn write_msg_history_csv(history: &MessageHistory, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "id,msg_wait,simtime,datetime,processing,delay,origin,destination,data"
    )?;
    for (id, hops) in history.iter() {
        for hop in hops {
            writeln!(
                w,
                "{},{},{},{},{},{},{},{},\"{}\"",
                id,
                hop.wait,
                hop.time.as_secs_f64(),
                hop.datetime
                    .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                hop.reserve,
                hop.total_delay - hop.reserve,
                hop.from,
                hop.to,
                hop.message.to_json().replace('"', "\"\""),
            )?;
        }
    }
    Ok(())
}

const SERIES: [&str; 5] = [
    "Sim_time",
    "msg_wait_time",
    "delay_till_next_msg",
    "processing_time",
    "data_size",
];

fn node_series(node: &NodeEntry) -> [&Vec<f64>; 5] {
    [
        &node.tally.time_received,
        &node.tally.wait_times,
        &node.tally.delay_till_next,
        &node.tally.processing_times,
        &node.tally.data_sizes,
    ]
}

/// `node_stats.txt`: a describe-style block per node, optionally followed by
/// the node's full per-message history.
pub fn write_node_stats(
    sim: &Simulation,
    w: &mut dyn Write,
    write_history: bool,
) -> io::Result<()> {
    for node in sim.nodes() {
        writeln!(w, "\nNode: {}", node.label)?;
        let summaries = node_series(node).map(|series| Summary::of(series));

        write!(w, "{:>8}", "")?;
        for name in SERIES {
            write!(w, "{:>22}", name)?;
        }
        writeln!(w)?;

        let rows: [(&str, fn(&Summary) -> f64); 9] = [
            ("count", |s| s.count as f64),
            ("mean", |s| s.mean),
            ("std", |s| s.std),
            ("min", |s| s.min),
            ("25%", |s| s.q25),
            ("50%", |s| s.median),
            ("75%", |s| s.q75),
            ("max", |s| s.max),
            ("sum", |s| s.sum),
        ];
        for (name, field) in rows {
            write!(w, "{:>8}", name)?;
            for summary in &summaries {
                write!(w, "{:>22.6}", field(summary))?;
            }
            writeln!(w)?;
        }

        if write_history {
            writeln!(w, "Node History")?;
            writeln!(
                w,
                "{:>40}{:>16}{:>16}{:>16}{:>16}{:>16}",
                "UUID", SERIES[0], SERIES[1], SERIES[2], SERIES[3], SERIES[4]
            )?;
            for i in 0..node.tally.msg_ids.len() {
                writeln!(
                    w,
                    "{:>40}{:>16.6}{:>16.6}{:>16.6}{:>16.6}{:>16.6}",
                    node.tally.msg_ids[i],
                    node.tally.time_received[i],
                    node.tally.wait_times[i],
                    node.tally.delay_till_next[i],
                    node.tally.processing_times[i],
                    node.tally.data_sizes[i],
                )?;
            }
        }
    }
    Ok(())
}

/// `node_stats_total.txt`: one aggregate row per node.
pub fn write_node_stats_total(sim: &Simulation, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{:>30}{:>14}{:>14}{:>14}{:>14}{:>14}{:>14}{:>16}{:>16}{:>16}",
        "node",
        "sum_size",
        "mean_size",
        "std_size",
        "sum_wait",
        "mean_wait",
        "std_wait",
        "sum_processing",
        "mean_processing",
        "std_processing",
    )?;
    for node in sim.nodes() {
        let size = Summary::of(&node.tally.data_sizes);
        let wait = Summary::of(&node.tally.wait_times);
        let processing = Summary::of(&node.tally.processing_times);
        writeln!(
            w,
            "{:>30}{:>14.4}{:>14.4}{:>14.4}{:>14.4}{:>14.4}{:>14.4}{:>16.4}{:>16.4}{:>16.4}",
            node.label,
            size.sum,
            size.mean,
            size.std,
            wait.sum,
            wait.mean,
            wait.std,
            processing.sum,
            processing.mean,
            processing.std,
        )?;
    }
    Ok(())
}

/// `sim_end_state.txt`: run parameters and the final state of every node.
pub fn write_sim_end_state(
    sim: &Simulation,
    network_name: &str,
    w: &mut dyn Write,
) -> io::Result<()> {
    writeln!(w, "network_name: {}", network_name)?;
    writeln!(w, "seed: {}", sim.seed())?;
    writeln!(
        w,
        "epoch: {}",
        sim.epoch().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
    )?;
    writeln!(w, "final_simtime: {}", sim.now().as_secs_f64())?;
    writeln!(w, "messages_seen: {}", sim.history().len())?;
    writeln!(w, "\nNode Configuration")?;
    for (index, node) in sim.nodes().iter().enumerate() {
        let state = sim
            .behavior(astrons_engine::NodeId(index as u32))
            .map(|b| b.state_dump())
            .unwrap_or_else(|| "<terminated>".to_string());
        writeln!(
            w,
            "{} [{}] processed={} terminated={}\n    {}",
            node.label,
            node.kind,
            node.tally.msgs_processed,
            node.is_terminated(),
            state,
        )?;
    }
    Ok(())
}
