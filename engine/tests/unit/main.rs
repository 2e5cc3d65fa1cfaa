mod test_fsm;
mod test_releases;
mod test_targets;
mod test_vault;
