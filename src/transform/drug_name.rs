//! Brand-to-generic name normalization applied before any query is built.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Brand (or informal) names mapped to the generic term FAERS reports index on.
const BRAND_TO_GENERIC: &[(&str, &str)] = &[
    ("tylenol", "acetaminophen"),
    ("advil", "ibuprofen"),
    ("motrin", "ibuprofen"),
    ("aleve", "naproxen"),
    ("benadryl", "diphenhydramine"),
    ("claritin", "loratadine"),
    ("zyrtec", "cetirizine"),
    ("allegra", "fexofenadine"),
    ("zantac", "ranitidine"),
    ("pepcid", "famotidine"),
    ("prilosec", "omeprazole"),
    ("lipitor", "atorvastatin"),
    ("zocor", "simvastatin"),
    ("norvasc", "amlodipine"),
    ("hctz", "hydrochlorothiazide"),
    ("glucophage", "metformin"),
    ("synthroid", "levothyroxine"),
    ("ambien", "zolpidem"),
    ("xanax", "alprazolam"),
    ("prozac", "fluoxetine"),
    ("zoloft", "sertraline"),
    ("paxil", "paroxetine"),
    ("lexapro", "escitalopram"),
    ("cymbalta", "duloxetine"),
    ("wellbutrin", "bupropion"),
    ("desyrel", "trazodone"),
    ("eliquis", "apixaban"),
    ("xarelto", "rivaroxaban"),
    ("pradaxa", "dabigatran"),
    ("coumadin", "warfarin"),
    ("januvia", "sitagliptin"),
    ("tradjenta", "linagliptin"),
    ("jardiance", "empagliflozin"),
    ("farxiga", "dapagliflozin"),
    ("invokana", "canagliflozin"),
    ("ozempic", "semaglutide"),
    ("victoza", "liraglutide"),
    ("trulicity", "dulaglutide"),
    ("humira", "adalimumab"),
    ("enbrel", "etanercept"),
    ("remicade", "infliximab"),
    ("stelara", "ustekinumab"),
    ("keytruda", "pembrolizumab"),
    ("opdivo", "nivolumab"),
    ("revlimid", "lenalidomide"),
    ("rituxan", "rituximab"),
    ("herceptin", "trastuzumab"),
    ("avastin", "bevacizumab"),
    ("spiriva", "tiotropium"),
    ("advair", "fluticasone/salmeterol"),
    ("symbicort", "budesonide/formoterol"),
    ("singulair", "montelukast"),
    ("lyrica", "pregabalin"),
    ("neurontin", "gabapentin"),
    ("topamax", "topiramate"),
    ("lamictal", "lamotrigine"),
    ("keppra", "levetiracetam"),
    ("dilantin", "phenytoin"),
    ("tegretol", "carbamazepine"),
    ("depakote", "divalproex"),
    ("vyvanse", "lisdexamfetamine"),
    ("adderall", "amphetamine/dextroamphetamine"),
    ("ritalin", "methylphenidate"),
    ("concerta", "methylphenidate"),
    ("focalin", "dexmethylphenidate"),
    ("strattera", "atomoxetine"),
    ("viagra", "sildenafil"),
    ("cialis", "tadalafil"),
    ("levitra", "vardenafil"),
    ("bactrim", "sulfamethoxazole/trimethoprim"),
    ("keflex", "cephalexin"),
    ("augmentin", "amoxicillin/clavulanate"),
    ("zithromax", "azithromycin"),
    ("levaquin", "levofloxacin"),
    ("cipro", "ciprofloxacin"),
    ("diflucan", "fluconazole"),
    ("tamiflu", "oseltamivir"),
    ("valtrex", "valacyclovir"),
    ("zofran", "ondansetron"),
    ("phenergan", "promethazine"),
    ("imitrex", "sumatriptan"),
    ("flexeril", "cyclobenzaprine"),
    ("soma", "carisoprodol"),
    ("valium", "diazepam"),
    ("ativan", "lorazepam"),
    ("klonopin", "clonazepam"),
    ("restoril", "temazepam"),
    ("ultram", "tramadol"),
    ("percocet", "oxycodone/acetaminophen"),
    ("vicodin", "hydrocodone/acetaminophen"),
    ("oxycontin", "oxycodone"),
    ("dilaudid", "hydromorphone"),
    ("ms contin", "morphine"),
    ("duragesic", "fentanyl"),
];

/// A case-folded, whitespace-collapsed drug or event term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NormalizedName(String);

impl NormalizedName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NormalizedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn table() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| BRAND_TO_GENERIC.iter().copied().collect())
}

fn whitespace_run() -> &'static Regex {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn fold(raw: &str) -> String {
    whitespace_run()
        .replace_all(raw.trim(), " ")
        .to_lowercase()
}

/// Maps a brand or informal drug name to its generic term; unknown names pass through folded.
pub fn normalize(raw: &str) -> NormalizedName {
    let folded = fold(raw);
    match table().get(folded.as_str()) {
        Some(generic) => NormalizedName((*generic).to_string()),
        None => NormalizedName(folded),
    }
}

/// Folds a reaction term the same way as drug names, without the brand table.
pub fn normalize_event(raw: &str) -> NormalizedName {
    NormalizedName(fold(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn maps_brand_names_case_insensitively() {
        assert_eq!(normalize("Tylenol").as_str(), "acetaminophen");
        assert_eq!(normalize("  ADVIL ").as_str(), "ibuprofen");
        assert_eq!(normalize("MS   Contin").as_str(), "morphine");
    }

    #[test]
    fn unknown_names_pass_through_folded() {
        assert_eq!(normalize("Ibuprofen").as_str(), "ibuprofen");
        assert_eq!(normalize("Some\tNew  Drug").as_str(), "some new drug");
        assert!(normalize("   ").is_empty());
    }

    #[test]
    fn event_names_are_folded_but_never_remapped() {
        assert_eq!(normalize_event(" Headache ").as_str(), "headache");
        assert_eq!(normalize_event("Tylenol").as_str(), "tylenol");
    }

    #[test]
    fn table_never_maps_to_another_key() {
        for (brand, generic) in BRAND_TO_GENERIC {
            assert_eq!(*brand, fold(brand), "key {brand} is not folded");
            assert_eq!(*generic, fold(generic), "value {generic} is not folded");
            assert!(
                !table().contains_key(generic),
                "{brand} maps to {generic}, which is itself a key"
            );
        }
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(raw in "\\PC{0,24}") {
            let once = normalize(&raw);
            let twice = normalize(once.as_str());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn normalize_is_idempotent_for_table_entries(idx in 0..BRAND_TO_GENERIC.len(), upper in any::<bool>()) {
            let (brand, _) = BRAND_TO_GENERIC[idx];
            let raw = if upper { brand.to_uppercase() } else { brand.to_string() };
            let once = normalize(&raw);
            prop_assert_eq!(normalize(once.as_str()), once);
        }
    }
}
