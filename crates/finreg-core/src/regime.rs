//! Supported regulatory regimes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Regulatory framework an audit is run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    /// Anti-money-laundering special audit (GwG, § 25h KWG)
    #[default]
    Gwg,
    /// Digital operational resilience (DORA)
    Dora,
    /// Risk management (MaRisk, § 25a KWG)
    Marisk,
    /// Securities supervision (WpHG, MaComp)
    Wphg,
}

impl Regime {
    pub const ALL: [Regime; 4] = [Regime::Gwg, Regime::Dora, Regime::Marisk, Regime::Wphg];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Gwg => "gwg",
            Regime::Dora => "dora",
            Regime::Marisk => "marisk",
            Regime::Wphg => "wphg",
        }
    }

    pub fn report_title(&self) -> &'static str {
        match self {
            Regime::Gwg => "GwG-Sonderprüfungsbericht",
            Regime::Dora => "DORA-Prüfungsbericht",
            Regime::Marisk => "MaRisk-Prüfungsbericht",
            Regime::Wphg => "WpHG/MaComp-Prüfungsbericht",
        }
    }

    pub fn report_subtitle(&self) -> &'static str {
        match self {
            Regime::Gwg => {
                "Simulierte Sonderprüfung gemäß §25h KWG · GwG · BaFin-Auslegungshinweise"
            }
            Regime::Dora => {
                "Prüfung der digitalen operationalen Resilienz gemäß DORA (EU) 2022/2554"
            }
            Regime::Marisk => "Prüfung gemäß MaRisk und §25a KWG",
            Regime::Wphg => "Prüfung gemäß WpHG, MaComp und MiFID II",
        }
    }

    /// Audit type as shown in report metadata.
    pub fn audit_type(&self) -> &'static str {
        match self {
            Regime::Gwg => "GwG-Sonderprüfung",
            Regime::Dora => "DORA-Prüfung",
            Regime::Marisk => "MaRisk-Prüfung",
            Regime::Wphg => "WpHG/MaComp-Prüfung",
        }
    }

    /// Default legal basis, used when the catalog names none.
    pub fn default_basis(&self) -> &'static [&'static str] {
        match self {
            Regime::Gwg => &["GwG 2017 i.d.F. 2024", "§25h KWG", "BaFin AuA GwG"],
            Regime::Dora => &[
                "DORA (EU) 2022/2554",
                "RTS ICT Risk",
                "RTS Incident Reporting",
            ],
            Regime::Marisk => &["MaRisk 2023 AT/BT", "§25a KWG", "EBA-Leitlinien"],
            Regime::Wphg => &["WpHG", "MaComp", "MAR", "MiFID II"],
        }
    }

    /// Auditor persona and legal framework placed at the top of the
    /// generation system prompt.
    pub fn auditor_context(&self) -> &'static str {
        match self {
            Regime::Gwg => concat!(
                "Du bist ein erfahrener Sonderprüfer der BaFin mit Spezialisierung auf ",
                "Geldwäscheprävention.\n",
                "Du führst eine Sonderprüfung gemäß §25h KWG und GwG durch.\n",
                "Relevante Rechtsrahmen: GwG 2017 i.d.F. 2024, §25h KWG, BaFin AuA GwG, ",
                "AMLA-Leitlinien."
            ),
            Regime::Dora => concat!(
                "Du bist ein erfahrener Prüfer mit Spezialisierung auf digitale operationale ",
                "Resilienz.\n",
                "Du führst eine Prüfung gemäß DORA (EU) 2022/2554 durch.\n",
                "Relevante Rechtsrahmen: DORA Art. 5-46, RTS ICT Risk, RTS Incident Reporting, ",
                "TIBER-EU."
            ),
            Regime::Marisk => concat!(
                "Du bist ein erfahrener Prüfer der BaFin mit Spezialisierung auf ",
                "Risikomanagement.\n",
                "Du führst eine Prüfung gemäß MaRisk (BaFin-Rundschreiben) und §25a KWG durch.\n",
                "Relevante Rechtsrahmen: MaRisk 2023 (AT/BT), §25a KWG, EBA-Leitlinien."
            ),
            Regime::Wphg => concat!(
                "Du bist ein erfahrener Prüfer mit Spezialisierung auf Wertpapieraufsicht ",
                "und Compliance.\n",
                "Du führst eine Prüfung gemäß WpHG und MaComp durch.\n",
                "Relevante Rechtsrahmen: WpHG, MaComp, MAR (EU) Nr. 596/2014, MiFID II."
            ),
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Regime::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown regime '{}', expected one of: gwg, dora, marisk, wphg",
                    s
                )
            })
    }
}
