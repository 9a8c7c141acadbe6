//! Solver variable names.
//!
//! Header variables are global to a job. Everything else is namespaced by
//! layer slot (`l{slot}`), and instance state additionally by instance number
//! (`i{n}`), so layers built from the same synthesizer never alias. Nodes,
//! ACLs and edges are referred to by index, which keeps names valid SMT-LIB
//! symbols whatever the device naming.

pub fn acl_match(slot: usize, node: usize, acl: usize, line: usize) -> String {
    format!("l{slot}_n{node}_a{acl}_m{line}")
}

/// No line before `line` matched.
pub fn acl_unmatched(slot: usize, node: usize, acl: usize, line: usize) -> String {
    format!("l{slot}_n{node}_a{acl}_u{line}")
}

pub fn acl_permit(slot: usize, node: usize, acl: usize) -> String {
    format!("l{slot}_n{node}_a{acl}_permit")
}

pub fn local(slot: usize, node: usize) -> String {
    format!("l{slot}_n{node}_local")
}

pub fn route_chosen(slot: usize, node: usize, group: usize) -> String {
    format!("l{slot}_n{node}_r{group}")
}

pub fn origin(slot: usize, instance: usize, node: usize) -> String {
    format!("l{slot}_i{instance}_o{node}")
}

pub fn present(slot: usize, instance: usize, step: usize, node: usize) -> String {
    format!("l{slot}_i{instance}_p{step}_n{node}")
}

pub fn crosses(slot: usize, instance: usize, step: usize, edge: usize) -> String {
    format!("l{slot}_i{instance}_x{step}_e{edge}")
}
