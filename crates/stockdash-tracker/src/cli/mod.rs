/*
[INPUT]:  CLI subcommand arguments
[OUTPUT]: Command helpers for the tracker binary
[POS]:    CLI layer
[UPDATE]: When adding subcommands
*/

pub mod init;
