// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmarks for `sieve_tape` live in `benches/`.
