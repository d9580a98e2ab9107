use std::fmt;

const RULE: &str = "+--------+--------------------+--------------------+----------+";

/// One register's value on both sides of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RegisterRow {
    /// Register name (`a0`, `pc`, `mepc`, ...).
    pub name: &'static str,
    /// Value read back from the reference model.
    pub reference: u64,
    /// Value committed by the emulator.
    pub emulator: u64,
}

impl RegisterRow {
    /// Returns `true` when both sides agree.
    #[must_use]
    pub const fn matches(&self) -> bool {
        self.reference == self.emulator
    }
}

/// Side-by-side register comparison at one committed PC.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiffReport {
    /// PC of the instruction whose commit was compared.
    pub pc: u64,
    /// General-purpose registers, then `pc`, then CSRs when compared.
    pub rows: Vec<RegisterRow>,
}

impl DiffReport {
    /// Returns `true` when every row matches.
    #[must_use]
    pub fn is_match(&self) -> bool {
        self.rows.iter().all(RegisterRow::matches)
    }

    /// Rows that differ, in table order.
    pub fn mismatches(&self) -> impl Iterator<Item = &RegisterRow> + '_ {
        self.rows.iter().filter(|row| !row.matches())
    }

    /// First differing row.
    #[must_use]
    pub fn first_mismatch(&self) -> Option<&RegisterRow> {
        self.mismatches().next()
    }

    /// Comma-separated list of differing registers, e.g. `"a0 ref=0x1 dut=0x2"`.
    #[must_use]
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .mismatches()
            .map(|row| {
                format!(
                    "{} ref={:#010x} dut={:#010x}",
                    row.name, row.reference, row.emulator
                )
            })
            .collect();
        if parts.is_empty() {
            "no register differs".to_owned()
        } else {
            parts.join(", ")
        }
    }
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{RULE}")?;
        writeln!(f, "| Difftest FAILED at PC = {:#010x}", self.pc)?;
        writeln!(f, "{RULE}")?;
        writeln!(
            f,
            "| {:<6} | {:<18} | {:<18} | {:<8} |",
            "Reg", "REF", "DUT", "Status"
        )?;
        writeln!(f, "{RULE}")?;
        for row in &self.rows {
            writeln!(
                f,
                "| {:<6} | {:<#18x} | {:<#18x} | {:<8} |",
                row.name,
                row.reference,
                row.emulator,
                if row.matches() { "OK" } else { "MISMATCH" }
            )?;
        }
        write!(f, "{RULE}")
    }
}

#[cfg(test)]
mod tests {
    use super::{DiffReport, RegisterRow};

    #[cfg(feature = "serde")]
    #[test]
    fn report_is_serializable() {
        fn serializable<T: serde::Serialize>() {}
        serializable::<DiffReport>();
    }

    fn report() -> DiffReport {
        DiffReport {
            pc: 0x8000_0010,
            rows: vec![
                RegisterRow {
                    name: "ra",
                    reference: 1,
                    emulator: 1,
                },
                RegisterRow {
                    name: "a0",
                    reference: 0x2A,
                    emulator: 0x2B,
                },
                RegisterRow {
                    name: "pc",
                    reference: 0x8000_0014,
                    emulator: 0x8000_0014,
                },
            ],
        }
    }

    #[test]
    fn first_mismatch_names_the_register() {
        let report = report();
        assert!(!report.is_match());
        assert_eq!(report.first_mismatch().map(|row| row.name), Some("a0"));
        assert_eq!(report.summary(), "a0 ref=0x0000002a dut=0x0000002b");
    }

    #[test]
    fn table_flags_each_row() {
        let table = report().to_string();
        assert!(table.contains("Difftest FAILED at PC = 0x80000010"));
        let flagged: Vec<_> = table
            .lines()
            .filter(|line| line.contains("MISMATCH"))
            .collect();
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0].starts_with("| a0 "));
        assert_eq!(table.lines().filter(|line| line.contains(" OK ")).count(), 2);
    }
}
