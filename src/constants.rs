//! Field names and fixed value lists shared by the flows and reports.

/// Registry dates are always fixed-width ISO days.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// Flow names (used in the CLI and as store namespace prefixes)
pub const RESOLUTIONS_FLOW: &str = "prolongation_resolutions";
pub const PROLONGATION_FLOW: &str = "prolongation_licenses";
pub const COMMISSIONING_FLOW: &str = "commissioning_licenses";
pub const SPECIAL_FLOW: &str = "special_licenses";

// Record fields
pub const INN: &str = "inn";
pub const NAME: &str = "name";
pub const OWNER_NAME: &str = "owner_name";
pub const OUR: &str = "our";
pub const PIPEDRIVE_ORG_ID: &str = "pipedrive_org_id";
pub const SERVICE_NAME: &str = "service_name";
pub const LICENCE_STATUS: &str = "lic_status_name";
pub const LICENCE_NUM: &str = "licence_num";
pub const VALID_TO: &str = "valid_to";
pub const DATE_END: &str = "date_end";
pub const DATE_START: &str = "date_start";
pub const DATE_SERVICE_START: &str = "date_service_start";
pub const TEL: &str = "tel";

/// CRM column holding the contact phone.
pub const CRM_PHONE_COLUMN: &str = "smsPhone";

pub const INACTIVE_STATUS: &str = "недействующая";
pub const INDIVIDUAL_ENTREPRENEUR: &str = "Индивидуальный предприниматель";

pub const TELEGRAPH: &str = "Услуги телеграфной связи";
pub const BROADCASTING: &str = "Услуги связи для целей эфирного вещания";
pub const DEDICATED_MOBILE_RADIO: &str = "Услуги подвижной радиосвязи в выделенной сети связи";
pub const PAYPHONES: &str = "Услуги местной телефонной связи с использованием таксофонов";
pub const MOBILE_SATELLITE: &str = "Услуги подвижной спутниковой радиосвязи";
pub const PUBLIC_MOBILE_RADIO: &str = "Услуги подвижной радиосвязи в сети связи общего пользования";
pub const MOBILE_RADIOTELEPHONE: &str = "Услуги подвижной радиотелефонной связи";
pub const PAGING: &str = "Услуги связи персонального радиовызова";
pub const LONG_DISTANCE: &str = "Услуги междугородной и международной телефонной связи";
pub const POSTAL: &str = "Услуги почтовой связи";
pub const DATA_EXCEPT_VOICE: &str =
    "Услуги связи по передаче данных, за исключением услуг связи по передаче данных для целей передачи голосовой информации";
pub const CABLE_TV: &str =
    "Предоставление услуг по трансляции телевизионных и звуковых программ по сети кабельного телевидения";
pub const TERRESTRIAL_TV: &str = "Предоставление услуг по эфирной трансляции телевизионных программ";

pub const PROLONGATION_EXCLUDED_SERVICES: &[&str] = &[
    TELEGRAPH,
    DEDICATED_MOBILE_RADIO,
    PAYPHONES,
    MOBILE_SATELLITE,
    PUBLIC_MOBILE_RADIO,
    MOBILE_RADIOTELEPHONE,
    PAGING,
    LONG_DISTANCE,
];

pub const COMMISSIONING_EXCLUDED_SERVICES: &[&str] = &[
    TELEGRAPH,
    BROADCASTING,
    DEDICATED_MOBILE_RADIO,
    PAYPHONES,
    MOBILE_SATELLITE,
    PUBLIC_MOBILE_RADIO,
    MOBILE_RADIOTELEPHONE,
    PAGING,
    LONG_DISTANCE,
];

pub const SPECIAL_EXCLUDED_SERVICES: &[&str] = &[
    TELEGRAPH,
    DEDICATED_MOBILE_RADIO,
    MOBILE_SATELLITE,
    PUBLIC_MOBILE_RADIO,
    MOBILE_RADIOTELEPHONE,
    PAGING,
    LONG_DISTANCE,
    POSTAL,
    DATA_EXCEPT_VOICE,
    CABLE_TV,
    TERRESTRIAL_TV,
];

/// Report column titles for known registry fields.
pub const HUMANIZED_FIELDS: &[(&str, &str)] = &[
    ("name", "Наименование лицензиата"),
    ("ownership", "Организационно-правовая форма"),
    ("name_short", "Краткое наименование"),
    ("addr_legal", "Адрес места нахождения"),
    ("inn", "ИНН лицензиата"),
    ("ogrn", "ОГРН/ОГРНИП"),
    ("licence_num", "Регистрационный номер лицензии"),
    ("lic_status_name", "Статус лицензии"),
    ("date_start", "День начала оказания услуг (не позднее)"),
    ("date_end", "Срок действия, до"),
    ("date_order", "Дата внесения в реестр сведений о выдаче (продлении срока действия, переоформлении, прекращении действия лицензии, приостановлении действия лицензии, возобновления действия лицензии)"),
    ("service_name", "Лицензируемый вид деятельности с указанием выполняемых работ, составляющих лицензируемый вид деятельности"),
    ("territory", "Территория действия лицензии"),
    ("num_order", "Номер лицензионного приказа"),
    ("our", "Наши"),
    ("pipedrive_org_id", "ID организации в Pipedrive"),
];

pub fn humanized_header(field: &str) -> &str {
    HUMANIZED_FIELDS
        .iter()
        .find(|(k, _)| *k == field)
        .map(|(_, v)| *v)
        .unwrap_or(field)
}

/// Supported flow names
pub fn get_supported_flows() -> Vec<&'static str> {
    vec![RESOLUTIONS_FLOW, PROLONGATION_FLOW, COMMISSIONING_FLOW, SPECIAL_FLOW]
}
