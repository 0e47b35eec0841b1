use serde::Deserialize;

/// Every string the bot sends. Loaded from the `[texts]` config section;
/// missing keys fall back to the built-in Russian defaults.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Texts {
    pub start: String,
    pub model_choice: String,
    pub model_choice_default_button: String,
    pub model_choice_webcam_button: String,
    pub photographer: String,
    pub makeup: String,
    pub stylist: String,
    pub about_platform: String,
    pub equipment: String,
    pub privacy_rules: String,
    pub help: String,
    pub portfolio: String,
    pub next_steps: String,

    pub model_order_default: String,
    pub model_order_webcam: String,
    pub model_experience_yes: String,
    pub model_experience_no: String,
    /// Reply for a callback whose suffix no family knows.
    pub callback_fallback: String,

    /// `{user}` is replaced with the sender identifier.
    pub photo_added: String,
    pub video_added: String,
    /// Admin-side caption sent after a forwarded upload.
    pub upload_notice: String,

    pub error_reply: String,
    pub error_alert: String,
    pub bot_started: String,
    pub bot_stopped: String,

    pub menu_start: String,
    pub menu_about_platform: String,
    pub menu_privacy_rules: String,
}

impl Default for Texts {
    fn default() -> Self {
        Self {
            start: "Здравствуйте! Это бот кастингового агентства. \
                    Выберите интересующее направление в меню: /model, /photographer, \
                    /makeup или /stylist."
                .to_string(),
            model_choice: "Мы предлагаем два формата работы моделью. \
                           Какой вариант вам интересен?"
                .to_string(),
            model_choice_default_button: "Меня интересует только первый вариант".to_string(),
            model_choice_webcam_button: "Я рассматриваю второй вариант".to_string(),
            photographer: "Мы ищем фотографов для съёмок в студии и на выезде. \
                           Пришлите несколько работ из вашего портфолио."
                .to_string(),
            makeup: "В данный момент, к сожалению, нет открытых вакансий на позицию визажиста"
                .to_string(),
            stylist: "В данный момент, к сожалению, нет открытых вакансий на позицию стилиста"
                .to_string(),
            about_platform: "Наша платформа соединяет моделей, фотографов и заказчиков. \
                             Все съёмки проходят по договору."
                .to_string(),
            equipment: "Для онлайн-работы понадобятся ноутбук или компьютер с веб-камерой, \
                        стабильный интернет и хорошее освещение."
                .to_string(),
            privacy_rules: "Мы не передаём ваши фотографии и личные данные третьим лицам. \
                            Материалы используются только для рассмотрения анкеты."
                .to_string(),
            help: "Доступные команды: /start, /model, /photographer, /makeup, /stylist, \
                   /about_platform, /equipment, /privacy_rules, /portfolio, /next_steps."
                .to_string(),
            portfolio: "Пришлите 3-5 фотографий без фильтров: портрет, в полный рост и профиль. \
                        Можно добавить короткое видео."
                .to_string(),
            next_steps: "После получения портфолио менеджер свяжется с вами в течение двух рабочих дней."
                .to_string(),

            model_order_default: "Отлично! Пришлите, пожалуйста, ваши фотографии для портфолио."
                .to_string(),
            model_order_webcam: "Для работы по второму варианту нужна веб-камера. \
                                 Подробнее об оборудовании: /equipment."
                .to_string(),
            model_experience_yes: "Отлично, опыт работы будет преимуществом.".to_string(),
            model_experience_no: "Ничего страшного, мы всему научим.".to_string(),
            callback_fallback: "Неизвестный вариант. Попробуйте ещё раз.".to_string(),

            photo_added: "Photo added to {user} portfolio".to_string(),
            video_added: "Video added to {user} portfolio".to_string(),
            upload_notice: "{user}".to_string(),

            error_reply: "Произошла ошибка. Попробуйте позже.".to_string(),
            error_alert: "Произошла ошибка".to_string(),
            bot_started: "Бот запущен".to_string(),
            bot_stopped: "Бот остановлен".to_string(),

            menu_start: "Запустить бота".to_string(),
            menu_about_platform: "О нашей платформе".to_string(),
            menu_privacy_rules: "Правила конфиденциальности".to_string(),
        }
    }
}

/// Fill the `{user}` placeholder.
pub fn render(template: &str, user: &str) -> String {
    template.replace("{user}", user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_override_keeps_defaults() {
        let texts: Texts = toml::from_str(r#"start = "Hi""#).unwrap();
        assert_eq!(texts.start, "Hi");
        assert_eq!(texts.error_reply, Texts::default().error_reply);
    }

    #[test]
    fn test_render() {
        assert_eq!(render("Photo added to {user} portfolio", "anna"), "Photo added to anna portfolio");
        assert_eq!(render("no placeholder", "anna"), "no placeholder");
    }
}
