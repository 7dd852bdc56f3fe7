mod continuations;
mod schedule;
